use crate::elements::{FuncType, ValueType};
use std::borrow::Cow;

/// Signature of a [function].
///
/// The signature of a function consists of zero or more parameter [types]
/// and zero or more result [types]. Two signatures are considered equal if
/// they have equal lists of parameters and results.
///
/// [types]: enum.ValueType.html
/// [function]: struct.FuncInstance.html
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Cow<'static, [ValueType]>,
    results: Cow<'static, [ValueType]>,
}

impl Signature {
    /// Creates a new signature with the given parameter and result types.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use wasmite::{Signature, ValueType};
    ///
    /// // s1: (i32) -> ()
    /// let s1 = Signature::new(&[ValueType::I32][..], &[][..]);
    ///
    /// // s2: () -> i32
    /// let s2 = Signature::new(&[][..], &[ValueType::I32][..]);
    ///
    /// // s3: (i64) -> ()
    /// let dynamic_params = vec![ValueType::I64];
    /// let s3 = Signature::new(dynamic_params, &[][..]);
    /// ```
    pub fn new<P, R>(params: P, results: R) -> Signature
    where
        P: Into<Cow<'static, [ValueType]>>,
        R: Into<Cow<'static, [ValueType]>>,
    {
        Signature {
            params: params.into(),
            results: results.into(),
        }
    }

    /// Returns parameter types of this signature.
    pub fn params(&self) -> &[ValueType] {
        self.params.as_ref()
    }

    /// Returns result types of this signature.
    pub fn results(&self) -> &[ValueType] {
        self.results.as_ref()
    }

    /// Number of results, which is the arity of a call to a function of
    /// this signature.
    pub fn arity(&self) -> usize {
        self.results.len()
    }

    pub(crate) fn from_elements(func_type: &FuncType) -> Signature {
        Signature {
            params: func_type.params().to_vec().into(),
            results: func_type.results().to_vec().into(),
        }
    }
}
