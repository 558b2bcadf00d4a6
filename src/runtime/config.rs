use crate::runtime::{InitError, InitResult, MAX_METHOD_PRIORITY};

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct InitBehavior: u8 {
        const DISABLE_STATIC_CONSTRUCTORS = 0x01;
        const DISABLE_EXECUTION = 0x02;
        const CACHE_CONSTRUCTORS = 0x04;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitConfig {
    pub behavior: InitBehavior,
    /// Priority used when a cctor has to be compiled synchronously.
    pub cctor_priority: f32,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            behavior: InitBehavior::empty(),
            cctor_priority: MAX_METHOD_PRIORITY,
        }
    }
}

impl InitConfig {
    pub const BEHAVIOR_VAR: &'static str = "TYPEINIT_BEHAVIOR";
    pub const PRIORITY_VAR: &'static str = "TYPEINIT_CCTOR_PRIORITY";

    /// Reads `TYPEINIT_BEHAVIOR` (e.g. `DISABLE_EXECUTION | CACHE_CONSTRUCTORS`) and
    /// `TYPEINIT_CCTOR_PRIORITY`; unset variables keep their defaults.
    pub fn from_env() -> InitResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> InitResult<Self> {
        let mut config = Self::default();
        if let Some(behavior) = lookup(Self::BEHAVIOR_VAR) {
            config.behavior = bitflags::parser::from_str::<InitBehavior>(behavior.trim())
                .map_err(|err| {
                    InitError::InvalidConfig(format!("{}: {err}", Self::BEHAVIOR_VAR))
                })?;
        }
        if let Some(priority) = lookup(Self::PRIORITY_VAR) {
            config.cctor_priority = priority.trim().parse().map_err(|err| {
                InitError::InvalidConfig(format!("{}: {err}", Self::PRIORITY_VAR))
            })?;
        }
        Ok(config)
    }

    pub fn static_constructors_enabled(&self) -> bool {
        !self
            .behavior
            .contains(InitBehavior::DISABLE_STATIC_CONSTRUCTORS)
    }

    pub fn execution_enabled(&self) -> bool {
        !self.behavior.contains(InitBehavior::DISABLE_EXECUTION)
    }
}
