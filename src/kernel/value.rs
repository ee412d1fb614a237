//! Values passed between frames
//!
//! A strand resumes its frames with arbitrary payloads: the unit produced by a
//! timer, a joined strand's result, a spawned strand handle. `Value` is a
//! cheaply clonable, dynamically typed cell for all of them.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A dynamically typed, reference counted payload
#[derive(Clone)]
pub struct Value(Rc<dyn Any>);

impl Value {
    /// Wrap any `'static` value
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// The unit value, delivered by primitives that produce nothing
    pub fn unit() -> Self {
        Self::new(())
    }

    /// Check if this is the unit value
    pub fn is_unit(&self) -> bool {
        self.is::<()>()
    }

    /// Check the concrete type of the payload
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Borrow the payload as `T`, if that is its type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Clone the payload out as `T`, if that is its type
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Check whether two values share the same allocation
    pub fn ptr_eq(a: &Value, b: &Value) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&a.0), Rc::as_ptr(&b.0))
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::unit()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unit() {
            write!(f, "Value(())")
        } else if let Some(s) = self.downcast_ref::<&'static str>() {
            write!(f, "Value({:?})", s)
        } else if let Some(s) = self.downcast_ref::<String>() {
            write!(f, "Value({:?})", s)
        } else if let Some(n) = self.downcast_ref::<i64>() {
            write!(f, "Value({})", n)
        } else {
            write!(f, "Value(..)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_is_default() {
        let value = Value::default();
        assert!(value.is_unit());
        assert!(Value::unit().is::<()>());
    }

    #[test]
    fn test_downcast() {
        let value = Value::new(42i64);
        assert_eq!(value.downcast_ref::<i64>(), Some(&42));
        assert_eq!(value.get::<i64>(), Some(42));
        assert!(value.downcast_ref::<u8>().is_none());
        assert!(!value.is_unit());
    }

    #[test]
    fn test_clone_shares_allocation() {
        let a = Value::new(String::from("payload"));
        let b = a.clone();
        assert!(Value::ptr_eq(&a, &b));
        assert!(!Value::ptr_eq(&a, &Value::new(String::from("payload"))));
    }

    #[test]
    fn test_debug_output() {
        assert_eq!(format!("{:?}", Value::unit()), "Value(())");
        assert_eq!(format!("{:?}", Value::new(7i64)), "Value(7)");
        assert_eq!(format!("{:?}", Value::new(1.5f32)), "Value(..)");
    }
}
