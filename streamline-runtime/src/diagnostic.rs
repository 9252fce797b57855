use serde::{Deserialize, Serialize};
use std::any::type_name;

use crate::Error;

/// Diagnostic information about an error, in the shape the Runtime API
/// expects for `invocation/{id}/error` and `init/error` reports.
///
/// `Diagnostic` is automatically derived for some common types,
/// like boxed types that implement [`Error`][std::error::Error].
/// If you use an error type which comes from an external crate,
/// you can convert it to a common type like `Box<dyn std::error::Error>`.
///
/// [`error_type`][`Diagnostic::error_type`] is derived from the type name of
/// the original error with [`std::any::type_name`] as a fallback, which may
/// not be reliable for conditional error handling.
/// To get more descriptive fields, implement `From` for your error type:
///
/// ```
/// use streamline_runtime::Diagnostic;
///
/// #[derive(Debug)]
/// struct InvalidRequest(&'static str);
///
/// impl From<InvalidRequest> for Diagnostic {
///     fn from(error: InvalidRequest) -> Diagnostic {
///         Diagnostic::new("APIError.invalidRequest", error.0)
///     }
/// }
/// ```
#[derive(Debug, Eq, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// The type of exception or error returned by the function.
    /// Use this field to categorize the different kinds of errors that your
    /// function might experience.
    pub error_type: String,
    /// A string expression of the error. In standard implementations, it's
    /// the output from the [`Display`][std::fmt::Display] implementation of
    /// the original error.
    pub error_message: String,
    /// Optional stack frames, most recent call first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<String>>,
}

impl Diagnostic {
    /// Create a new diagnostic with an explicit error type.
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Diagnostic {
            error_type: error_type.into(),
            error_message: error_message.into(),
            stack_trace: None,
        }
    }
}

impl From<Error> for Diagnostic {
    fn from(value: Error) -> Self {
        Diagnostic::new(type_name_of_val(&value), value.to_string())
    }
}

impl From<Box<dyn std::error::Error>> for Diagnostic {
    fn from(value: Box<dyn std::error::Error>) -> Self {
        Diagnostic::new(type_name_of_val(&value), value.to_string())
    }
}

impl From<std::convert::Infallible> for Diagnostic {
    fn from(value: std::convert::Infallible) -> Self {
        match value {}
    }
}

impl From<String> for Diagnostic {
    fn from(value: String) -> Self {
        Diagnostic::new(type_name_of_val(&value), value)
    }
}

impl From<&'static str> for Diagnostic {
    fn from(value: &'static str) -> Self {
        Diagnostic::new(type_name_of_val(&value), value)
    }
}

impl From<std::io::Error> for Diagnostic {
    fn from(value: std::io::Error) -> Self {
        Diagnostic::new(type_name_of_val(&value), value.to_string())
    }
}

impl From<serde_json::Error> for Diagnostic {
    fn from(value: serde_json::Error) -> Self {
        Diagnostic::new(type_name_of_val(&value), value.to_string())
    }
}

pub(crate) fn type_name_of_val<T>(_: T) -> String {
    type_name::<T>().into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_lambda_error() {
        use serde_json::{json, Value};
        let expected = json!({
            "errorType": "InvalidEventDataError",
            "errorMessage": "Error parsing event data.",
        });

        let actual = Diagnostic::new("InvalidEventDataError", "Error parsing event data.");
        let actual: Value = serde_json::to_value(actual).expect("failed to serialize diagnostic");
        assert_eq!(expected, actual);
    }

    #[test]
    fn stack_trace_is_serialized_when_present() {
        let mut diagnostic = Diagnostic::new("APIError.invalidRequest", "bad request");
        diagnostic.stack_trace = Some(vec!["frame 0".into(), "frame 1".into()]);
        let value = serde_json::to_value(diagnostic).expect("failed to serialize diagnostic");
        assert_eq!(value["stackTrace"][1], "frame 1");
    }

    #[test]
    fn boxed_error_uses_type_name() {
        let err: Error = "something went wrong".into();
        let diagnostic: Diagnostic = err.into();
        assert!(diagnostic.error_type.contains("Box"));
        assert_eq!(diagnostic.error_message, "something went wrong");
    }
}
