//! Match outcomes and their caller-facing encoding.

use serde::Serialize;
use std::fmt;

/// Why a request could not be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputErrorReason {
    NameRequired,
    NameTooLong,
    NoFace,
    MultipleFaces,
    EncodingFailed,
    CaptureFailed,
    StorageFailure,
}

impl InputErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NameRequired => "name required",
            Self::NameTooLong => "name too long",
            Self::NoFace => "no face",
            Self::MultipleFaces => "multiple faces",
            Self::EncodingFailed => "could not extract face features",
            Self::CaptureFailed => "failed to capture frame",
            Self::StorageFailure => "storage failure",
        }
    }

    fn user_message(&self) -> &'static str {
        match self {
            Self::NameRequired => "Name is required",
            Self::NameTooLong => "Name is too long (max 100 bytes)",
            Self::NoFace => "No face detected in the image!",
            Self::MultipleFaces => "Multiple faces detected! Please show only one face.",
            Self::EncodingFailed => "Could not extract face features!",
            Self::CaptureFailed => "Failed to capture frame",
            Self::StorageFailure => "Face storage unavailable, please try again",
        }
    }
}

impl fmt::Display for InputErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a duplicate check, registration or recognition.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The face is already registered under `existing_name`.
    Duplicate { existing_name: String },
    /// The face was stored and is visible to subsequent searches.
    Registered { name: String },
    /// The nearest identity is within tolerance. `confidence` is in [0, 1].
    Recognized { name: String, confidence: f32 },
    /// The index has candidates but none close enough.
    Unrecognized,
    /// The index returned no candidates at all.
    NotFound,
    InputError { reason: InputErrorReason },
}

impl Verdict {
    pub fn input_error(reason: InputErrorReason) -> Self {
        Verdict::InputError { reason }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Verdict::Duplicate { .. })
    }
}

/// Wire form of a [`Verdict`] handed to front ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerdictResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VerdictResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            name: None,
            confidence: None,
            message: Some(message.into()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"message":"response encoding failed"}"#.to_string()
        })
    }
}

impl From<&Verdict> for VerdictResponse {
    fn from(verdict: &Verdict) -> Self {
        match verdict {
            Verdict::Registered { name } => Self {
                success: true,
                name: Some(name.clone()),
                confidence: None,
                message: Some(format!("Successfully registered face for: {name}")),
            },
            Verdict::Recognized { name, confidence } => Self {
                success: true,
                name: Some(name.clone()),
                confidence: Some(*confidence),
                message: None,
            },
            Verdict::Duplicate { existing_name } => Self {
                name: Some(existing_name.clone()),
                ..Self::failure(format!(
                    "This face is already registered as '{existing_name}'"
                ))
            },
            Verdict::Unrecognized => Self::failure("Face not recognized"),
            Verdict::NotFound => Self::failure("Face not found in database"),
            Verdict::InputError { reason } => Self::failure(reason.user_message()),
        }
    }
}

impl From<Verdict> for VerdictResponse {
    fn from(verdict: Verdict) -> Self {
        Self::from(&verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_only_for_registered_and_recognized() {
        let all = [
            Verdict::Duplicate { existing_name: "ann".into() },
            Verdict::Registered { name: "ann".into() },
            Verdict::Recognized { name: "ann".into(), confidence: 0.5 },
            Verdict::Unrecognized,
            Verdict::NotFound,
            Verdict::input_error(InputErrorReason::NoFace),
            Verdict::input_error(InputErrorReason::StorageFailure),
        ];
        for verdict in &all {
            let response = VerdictResponse::from(verdict);
            let expected = matches!(
                verdict,
                Verdict::Registered { .. } | Verdict::Recognized { .. }
            );
            assert_eq!(response.success, expected, "{verdict:?}");
            if !response.success {
                assert!(response.message.is_some(), "{verdict:?} needs a message");
                assert!(response.confidence.is_none());
            }
        }
    }

    #[test]
    fn test_duplicate_message_names_existing_identity() {
        let response = VerdictResponse::from(Verdict::Duplicate { existing_name: "bob".into() });
        assert_eq!(
            response.message.as_deref(),
            Some("This face is already registered as 'bob'")
        );
    }

    #[test]
    fn test_recognized_json_shape() {
        let response = VerdictResponse::from(Verdict::Recognized {
            name: "carol".into(),
            confidence: 0.5,
        });
        let json: serde_json::Value = serde_json::from_str(&response.to_json()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["name"], "carol");
        assert_eq!(json["confidence"], 0.5);
        assert!(json.get("message").is_none());
    }

    #[test]
    fn test_input_error_messages_are_distinct() {
        let a = VerdictResponse::from(Verdict::input_error(InputErrorReason::NoFace));
        let b = VerdictResponse::from(Verdict::input_error(InputErrorReason::MultipleFaces));
        let c = VerdictResponse::from(Verdict::input_error(InputErrorReason::StorageFailure));
        assert_ne!(a.message, b.message);
        assert_ne!(b.message, c.message);
        assert!(c.message.unwrap().contains("unavailable"));
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(InputErrorReason::NoFace.to_string(), "no face");
        assert_eq!(InputErrorReason::MultipleFaces.to_string(), "multiple faces");
        assert_eq!(InputErrorReason::NameRequired.to_string(), "name required");
        assert_eq!(InputErrorReason::StorageFailure.to_string(), "storage failure");
    }
}
