//! Owned, type-erased inputs of one memoized call
//!
//! [`Inputs`] carries the positional arguments, keyword arguments and declared
//! captured-context variables of a call. Serializable values record their
//! structural encoding up front; opaque values (live handles, types without a
//! `Serialize` impl) can only be fingerprinted through a registered
//! [`HashPolicy`](crate::HashPolicy) strategy.

use std::any::{Any, TypeId, type_name};
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::canonical;

/// One input value plus what the fingerprint engine needs to digest it
pub struct InputValue {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
    /// Canonical encoding, `None` for opaque values
    structural: Option<Result<Vec<u8>, String>>,
}

impl InputValue {
    /// Wrap a serializable value
    pub fn structural<T>(value: T) -> Self
    where
        T: Serialize + Any + Send + Sync,
    {
        let structural = Some(canonical::to_bytes(&value).map_err(|e| e.to_string()));
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: Box::new(value),
            structural,
        }
    }

    /// Wrap a value that has no structural encoding
    pub fn opaque<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: Box::new(value),
            structural: None,
        }
    }

    /// Runtime type of the wrapped value
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Declared type name of the wrapped value
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrow the value as `T`
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// The erased value
    #[must_use]
    pub fn as_any(&self) -> &dyn Any {
        self.value.as_ref()
    }

    pub(crate) fn structural_bytes(&self) -> Option<&Result<Vec<u8>, String>> {
        self.structural.as_ref()
    }

    /// Address of the boxed value, stable for the lifetime of this input
    pub(crate) fn address(&self) -> usize {
        std::ptr::from_ref::<dyn Any + Send + Sync>(self.value.as_ref()).cast::<()>() as usize
    }
}

impl fmt::Debug for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputValue")
            .field("type_name", &self.type_name)
            .field("opaque", &self.structural.is_none())
            .finish()
    }
}

/// The inputs of a single call
///
/// # Example
///
/// ```rust
/// use recall::Inputs;
///
/// let inputs = Inputs::new()
///     .arg(3_u64)
///     .kwarg("scale", 2.5_f64)
///     .captured("threshold", 10_i32);
///
/// assert_eq!(inputs.get::<u64>(0), Some(&3));
/// assert_eq!(inputs.kwarg_value::<f64>("scale"), Some(&2.5));
/// ```
#[derive(Debug, Default)]
pub struct Inputs {
    positional: Vec<InputValue>,
    keyword: BTreeMap<String, InputValue>,
    captured: BTreeMap<String, InputValue>,
}

impl Inputs {
    /// Create an empty input set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    #[must_use = "builder methods must be chained or built"]
    pub fn arg<T>(mut self, value: T) -> Self
    where
        T: Serialize + Any + Send + Sync,
    {
        self.positional.push(InputValue::structural(value));
        self
    }

    /// Append a positional argument with no structural encoding
    #[must_use = "builder methods must be chained or built"]
    pub fn opaque_arg<T>(mut self, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.positional.push(InputValue::opaque(value));
        self
    }

    /// Set a keyword argument; a repeated name replaces the earlier value
    #[must_use = "builder methods must be chained or built"]
    pub fn kwarg<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Serialize + Any + Send + Sync,
    {
        self.keyword.insert(name.into(), InputValue::structural(value));
        self
    }

    /// Set an opaque keyword argument
    #[must_use = "builder methods must be chained or built"]
    pub fn opaque_kwarg<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.keyword.insert(name.into(), InputValue::opaque(value));
        self
    }

    /// Declare a variable the computation reads from its defining context
    #[must_use = "builder methods must be chained or built"]
    pub fn captured<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Serialize + Any + Send + Sync,
    {
        self.captured.insert(name.into(), InputValue::structural(value));
        self
    }

    /// Declare an opaque captured variable
    #[must_use = "builder methods must be chained or built"]
    pub fn opaque_captured<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.captured.insert(name.into(), InputValue::opaque(value));
        self
    }

    /// Positional argument `index` as `T`
    #[must_use]
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.positional.get(index)?.downcast_ref()
    }

    /// Keyword argument `name` as `T`
    #[must_use]
    pub fn kwarg_value<T: Any>(&self, name: &str) -> Option<&T> {
        self.keyword.get(name)?.downcast_ref()
    }

    /// Captured variable `name` as `T`
    #[must_use]
    pub fn captured_value<T: Any>(&self, name: &str) -> Option<&T> {
        self.captured.get(name)?.downcast_ref()
    }

    /// Positional arguments in call order
    #[must_use]
    pub fn positional(&self) -> &[InputValue] {
        &self.positional
    }

    /// Keyword arguments in name order
    pub fn keyword(&self) -> impl Iterator<Item = (&str, &InputValue)> {
        self.keyword.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Captured variables in name order
    pub fn captured_vars(&self) -> impl Iterator<Item = (&str, &InputValue)> {
        self.captured.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Total number of inputs
    #[must_use]
    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len() + self.captured.len()
    }

    /// Whether the call has no inputs at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Connection;

    #[test]
    fn test_typed_access() {
        let inputs = Inputs::new()
            .arg(7_i64)
            .arg("name".to_string())
            .kwarg("limit", 5_usize)
            .opaque_captured("conn", Connection);

        assert_eq!(inputs.get::<i64>(0), Some(&7));
        assert_eq!(inputs.get::<String>(1).map(String::as_str), Some("name"));
        assert_eq!(inputs.get::<u8>(0), None);
        assert_eq!(inputs.kwarg_value::<usize>("limit"), Some(&5));
        assert!(inputs.captured_value::<Connection>("conn").is_some());
        assert_eq!(inputs.len(), 4);
    }

    #[test]
    fn test_keywords_iterate_sorted_and_replace() {
        let inputs = Inputs::new()
            .kwarg("zeta", 1)
            .kwarg("alpha", 2)
            .kwarg("zeta", 3);

        let names: Vec<_> = inputs.keyword().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(inputs.kwarg_value::<i32>("zeta"), Some(&3));
    }

    #[test]
    fn test_opaque_has_no_structural_bytes() {
        let value = InputValue::opaque(Connection);
        assert!(value.structural_bytes().is_none());
        assert!(value.type_name().ends_with("Connection"));

        let value = InputValue::structural(vec![1, 2, 3]);
        assert_eq!(
            value.structural_bytes().cloned(),
            Some(Ok(canonical::to_bytes(&vec![1, 2, 3]).unwrap()))
        );
    }
}
