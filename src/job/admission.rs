use serde::Serialize;
use serde_json::Value;

use crate::job::ledger::JobLedger;
use crate::job::record::{JobRecord, JobSpec, SUPPORTED_PROTOCOL_VERSION};

/// Submission-time policy: the image allow-list. An empty list allows
/// every image.
#[derive(Debug, Clone, Default)]
pub struct AdmissionPolicy {
    pub allowed_images: Vec<String>,
}

impl AdmissionPolicy {
    pub fn new(allowed_images: Vec<String>) -> Self {
        Self { allowed_images }
    }

    /// Exact match, or a trailing `name:*` pattern matching any tag under
    /// `name:`.
    pub fn image_allowed(&self, image: &str) -> bool {
        if self.allowed_images.is_empty() {
            return true;
        }
        self.allowed_images.iter().any(|pattern| {
            if let Some(prefix) = pattern.strip_suffix(":*") {
                image
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with(':'))
            } else {
                pattern == image
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    InvalidBody,
    UnsupportedProtocolVersion,
    MissingJobId,
    MissingRuntime,
    BadRuntimeMode,
    RuntimeNotSupported,
    MissingImage,
    ImageNotAllowed,
    JobIdAlreadyExists,
}

impl RejectionCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionCode::InvalidBody => "INVALID_BODY",
            RejectionCode::UnsupportedProtocolVersion => "UNSUPPORTED_PROTOCOL_VERSION",
            RejectionCode::MissingJobId => "MISSING_JOB_ID",
            RejectionCode::MissingRuntime => "MISSING_RUNTIME",
            RejectionCode::BadRuntimeMode => "BAD_RUNTIME_MODE",
            RejectionCode::RuntimeNotSupported => "RUNTIME_NOT_SUPPORTED",
            RejectionCode::MissingImage => "MISSING_IMAGE",
            RejectionCode::ImageNotAllowed => "IMAGE_NOT_ALLOWED",
            RejectionCode::JobIdAlreadyExists => "JOB_ID_ALREADY_EXISTS",
        }
    }
}

impl std::fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous rejection returned to the submitter. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub code: RejectionCode,
    pub message: String,
}

impl Rejection {
    pub fn new(code: RejectionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Validate a raw submission body and, on success, create its `queued`
/// ledger record. Rules run in a fixed order and the first failure wins;
/// a rejection never mutates the ledger.
pub fn admit(
    body: &Value,
    policy: &AdmissionPolicy,
    ledger: &mut JobLedger,
) -> Result<JobRecord, Rejection> {
    let spec = validate(body, policy)?;
    ledger.create(spec).map_err(|dup| {
        Rejection::new(
            RejectionCode::JobIdAlreadyExists,
            format!("job '{}' already exists on this node", dup.0),
        )
    })
}

/// The pure validation half of admission: raw body and policy in, typed
/// specification out.
pub fn validate(body: &Value, policy: &AdmissionPolicy) -> Result<JobSpec, Rejection> {
    let object = body.as_object().ok_or_else(|| {
        Rejection::new(RejectionCode::InvalidBody, "request body must be a JSON object")
    })?;

    match object.get("protocol_version").and_then(Value::as_i64) {
        Some(v) if v == SUPPORTED_PROTOCOL_VERSION => {}
        _ => {
            return Err(Rejection::new(
                RejectionCode::UnsupportedProtocolVersion,
                format!("protocol_version must be {SUPPORTED_PROTOCOL_VERSION}"),
            ))
        }
    }

    match object.get("job_id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => {}
        _ => {
            return Err(Rejection::new(
                RejectionCode::MissingJobId,
                "job_id must be a non-empty string",
            ))
        }
    }

    let runtime = object
        .get("runtime")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            Rejection::new(RejectionCode::MissingRuntime, "runtime must be an object")
        })?;

    match runtime.get("mode").and_then(Value::as_str) {
        Some("image") => {}
        Some("build") => {
            return Err(Rejection::new(
                RejectionCode::RuntimeNotSupported,
                "runtime mode 'build' is reserved and not yet supported",
            ))
        }
        _ => {
            return Err(Rejection::new(
                RejectionCode::BadRuntimeMode,
                "runtime.mode must be 'image' or 'build'",
            ))
        }
    }

    let image = match runtime.get("image").and_then(Value::as_str) {
        Some(image) if !image.is_empty() => image,
        _ => {
            return Err(Rejection::new(
                RejectionCode::MissingImage,
                "runtime.image must be a non-empty string",
            ))
        }
    };

    if !policy.image_allowed(image) {
        return Err(Rejection::new(
            RejectionCode::ImageNotAllowed,
            format!("image '{image}' is not on this node's allow-list"),
        ));
    }

    // Structural rules have passed; anything the typed parse still trips
    // over (e.g. a non-string env value) is a malformed body.
    serde_json::from_value(body.clone())
        .map_err(|e| Rejection::new(RejectionCode::InvalidBody, format!("malformed job spec: {e}")))
}
