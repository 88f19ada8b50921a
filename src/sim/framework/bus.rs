use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;

use crate::error::ConfigError;

/// Typed artifact storage connecting the stages of one run.
///
/// Artifacts are keyed by their concrete type. The bus is owned by a single
/// run and dropped with it, so a failed run leaves nothing behind.
#[derive(Default)]
pub struct Bus {
    values: HashMap<TypeId, Box<dyn Any>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the stored value of type `T`.
    pub fn put<T: 'static>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Like [`Bus::get`], failing with the name of the stage that needed it.
    pub fn require<T: 'static>(&self, stage: &str) -> Result<&T, ConfigError> {
        self.get::<T>().ok_or_else(|| ConfigError::MissingField {
            entity: format!("{stage} stage"),
            field: type_name::<T>(),
        })
    }

    /// Removes and returns the stored value of type `T`, if present.
    pub fn take<T: 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_take() {
        let mut bus = Bus::new();
        bus.put(3_u32);
        bus.put("label");
        assert_eq!(bus.get::<u32>(), Some(&3));
        bus.put(4_u32);
        assert_eq!(bus.len(), 2);
        assert_eq!(bus.take::<u32>(), Some(4));
        assert!(bus.get::<u32>().is_none());
    }

    #[test]
    fn test_require_names_stage_and_type() {
        let bus = Bus::new();
        let err = bus.require::<f64>("mesh").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("mesh stage") && text.contains("f64"), "{text}");
    }
}
