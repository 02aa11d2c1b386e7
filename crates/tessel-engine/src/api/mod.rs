//! The host API: every function guest code can call
//!
//! Each function carries the signature used by the code generator, the
//! capability class checked when a module is linked into a sandbox, and the
//! in-world delay that suspends the caller after the call returns.

mod builtins;
pub mod context;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tessel_codegen::{ApiCatalog, ApiSignature, ValueType};

pub use context::{HostServices, ScriptContext};

use crate::error::ScriptFault;
use crate::vm::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Pure computation and the script's own state
    Core,
    /// Chat, object properties and other in-world effects
    World,
    /// Email, instant messages and HTTP
    Network,
    /// Changes to the object's inventory
    Inventory,
}

/// How long a call suspends its caller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delay {
    None,
    Fixed(Duration),
    /// Seconds taken from the argument at this index
    FromArg(usize),
}

impl Delay {
    pub fn is_delay_bearing(self) -> bool {
        !matches!(self, Delay::None)
    }

    pub fn resolve(self, args: &[Value]) -> Option<Duration> {
        match self {
            Delay::None => None,
            Delay::Fixed(d) => Some(d),
            Delay::FromArg(i) => args
                .get(i)
                .map(|v| Duration::try_from_secs_f64(v.as_float()).unwrap_or(Duration::ZERO)),
        }
    }
}

pub type ApiFn = fn(&mut ScriptContext<'_>, &[Value]) -> Result<Value, ScriptFault>;

pub struct ApiFunction {
    pub signature: ApiSignature,
    pub capability: Capability,
    pub delay: Delay,
    pub func: ApiFn,
}

impl std::fmt::Debug for ApiFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiFunction")
            .field("name", &self.signature.name)
            .field("capability", &self.capability)
            .field("delay", &self.delay)
            .finish()
    }
}

/// Catalog of host functions, indexed by name
#[derive(Debug, Default)]
pub struct HostApi {
    functions: Vec<ApiFunction>,
    index: HashMap<String, usize>,
}

impl HostApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// The functions shipped with the engine
    pub fn standard() -> Self {
        let mut api = Self::new();
        builtins::register(&mut api);
        api
    }

    pub fn register(
        &mut self,
        name: &str,
        params: &[ValueType],
        ret: ValueType,
        capability: Capability,
        delay: Delay,
        func: ApiFn,
    ) {
        let mut signature = ApiSignature::new(name, params, ret);
        if delay.is_delay_bearing() {
            signature = signature.delayed();
        }
        let entry = ApiFunction {
            signature,
            capability,
            delay,
            func,
        };
        match self.index.get(name) {
            Some(&i) => self.functions[i] = entry,
            None => {
                self.index.insert(name.to_string(), self.functions.len());
                self.functions.push(entry);
            }
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, index: usize) -> Option<&ApiFunction> {
        self.functions.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&ApiFunction> {
        self.index_of(name).and_then(|i| self.get(i))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl ApiCatalog for HostApi {
    fn lookup(&self, name: &str) -> Option<&ApiSignature> {
        self.by_name(name).map(|f| &f.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_bearing_functions_are_marked() {
        let api = HostApi::standard();
        assert!(api.lookup("llSleep").unwrap().delay_bearing);
        assert!(api.lookup("llSetPos").unwrap().delay_bearing);
        assert!(!api.lookup("llSay").unwrap().delay_bearing);
        assert_eq!(
            api.by_name("llInstantMessage").unwrap().delay,
            Delay::Fixed(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_capabilities() {
        let api = HostApi::standard();
        assert_eq!(api.by_name("llEmail").unwrap().capability, Capability::Network);
        assert_eq!(api.by_name("llAbs").unwrap().capability, Capability::Core);
        assert_eq!(
            api.by_name("llRemoveInventory").unwrap().capability,
            Capability::Inventory
        );
    }

    #[test]
    fn test_sleep_delay_comes_from_argument() {
        let delay = Delay::FromArg(0).resolve(&[Value::Float(1.5)]);
        assert_eq!(delay, Some(Duration::from_millis(1500)));
        assert_eq!(Delay::FromArg(0).resolve(&[Value::Float(-1.0)]), Some(Duration::ZERO));
    }
}
