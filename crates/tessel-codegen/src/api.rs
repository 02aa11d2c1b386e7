use std::collections::HashMap;

use crate::types::ValueType;

/// Signature of a host API function as seen by guest scripts
#[derive(Debug, Clone, PartialEq)]
pub struct ApiSignature {
    pub name: String,
    pub params: Vec<ValueType>,
    pub ret: ValueType,
    /// Calls may suspend the caller, so a continuation point follows them
    pub delay_bearing: bool,
}

impl ApiSignature {
    pub fn new(name: impl Into<String>, params: &[ValueType], ret: ValueType) -> Self {
        Self {
            name: name.into(),
            params: params.to_vec(),
            ret,
            delay_bearing: false,
        }
    }

    pub fn delayed(mut self) -> Self {
        self.delay_bearing = true;
        self
    }
}

/// Source of API signatures used to type-check calls
pub trait ApiCatalog {
    fn lookup(&self, name: &str) -> Option<&ApiSignature>;
}

impl ApiCatalog for HashMap<String, ApiSignature> {
    fn lookup(&self, name: &str) -> Option<&ApiSignature> {
        self.get(name)
    }
}

impl ApiCatalog for [ApiSignature] {
    fn lookup(&self, name: &str) -> Option<&ApiSignature> {
        self.iter().find(|sig| sig.name == name)
    }
}

impl ApiCatalog for Vec<ApiSignature> {
    fn lookup(&self, name: &str) -> Option<&ApiSignature> {
        self.as_slice().lookup(name)
    }
}
