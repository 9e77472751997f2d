use crate::error::PipelineError;

pub const MAX_DOWNLOAD_BYTES: u64 = 100 * 1024 * 1024;
pub const ALLOWED_CONTAINER_TYPES: [&str; 4] = ["mp4", "webm", "mp3", "wav"];

/// Which streams this service is willing to surface and serve.
#[derive(Debug, Clone)]
pub struct FormatPolicy {
    allowed_types: Vec<String>,
    max_bytes: u64,
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self::new(&ALLOWED_CONTAINER_TYPES, MAX_DOWNLOAD_BYTES)
    }
}

impl FormatPolicy {
    pub fn new(allowed_types: &[&str], max_bytes: u64) -> Self {
        Self {
            allowed_types: allowed_types
                .iter()
                .map(|value| value.to_ascii_lowercase())
                .collect(),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn is_type_allowed(&self, container_type: &str) -> bool {
        let normalized = container_type.trim().to_ascii_lowercase();
        !normalized.is_empty() && self.allowed_types.iter().any(|value| *value == normalized)
    }

    /// Unknown sizes pass; the download path re-checks the byte count while writing.
    pub fn is_size_allowed(&self, byte_size: Option<u64>) -> bool {
        byte_size.is_none_or(|size| size <= self.max_bytes)
    }

    pub fn is_acceptable(&self, container_type: &str, byte_size: Option<u64>) -> bool {
        self.is_type_allowed(container_type) && self.is_size_allowed(byte_size)
    }

    /// Size is checked before type, so an oversized stream reports `FileTooLarge`.
    pub fn enforce(
        &self,
        container_type: &str,
        byte_size: Option<u64>,
    ) -> Result<(), PipelineError> {
        if !self.is_size_allowed(byte_size) {
            return Err(PipelineError::FileTooLarge);
        }
        if !self.is_type_allowed(container_type) {
            return Err(PipelineError::TypeNotAllowed);
        }
        Ok(())
    }
}

pub fn mime_type_for(container_type: &str) -> &'static str {
    match container_type.trim().to_ascii_lowercase().as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}
