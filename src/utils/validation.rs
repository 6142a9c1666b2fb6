use std::path::Path;
use thiserror::Error;

/// Maximum file size: 10 MB
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024; // 10 MB

/// Allowed MIME types: fundus photographs in common web formats
pub const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Name used when a selection carries no usable file name
const FALLBACK_FILENAME: &str = "image";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("File size {size} bytes exceeds maximum allowed {max} bytes ({} MB)", .max / 1024 / 1024)]
    FileTooLarge { size: usize, max: usize },

    #[error("File appears to be empty")]
    EmptyFile,

    #[error("MIME type '{0}' is not allowed. Please upload a JPEG, PNG or WebP image.")]
    UnsupportedMimeType(String),

    #[error("File content ({detected}) does not match declared type '{claimed}'")]
    SignatureMismatch { claimed: String, detected: String },

    #[error("File contains executable content which is not allowed")]
    ExecutableContent,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            ValidationError::EmptyFile => "EMPTY_FILE",
            ValidationError::UnsupportedMimeType(_) => "INVALID_MIME_TYPE",
            ValidationError::SignatureMismatch { .. } => "SIGNATURE_MISMATCH",
            ValidationError::ExecutableContent => "EXECUTABLE_CONTENT",
        }
    }
}

/// Validates file size against maximum limit
pub fn validate_file_size(size: usize, max_size: usize) -> Result<(), ValidationError> {
    if size > max_size {
        return Err(ValidationError::FileTooLarge {
            size,
            max: max_size,
        });
    }
    if size == 0 {
        return Err(ValidationError::EmptyFile);
    }
    Ok(())
}

/// Validates MIME type against the allowlist, returning the normalized essence
pub fn validate_mime_type(content_type: &str, allowed: &[String]) -> Result<String, ValidationError> {
    let normalized = content_type
        .parse::<mime::Mime>()
        .map(|m| m.essence_str().to_lowercase())
        .unwrap_or_else(|_| content_type.trim().to_lowercase());

    if allowed.iter().any(|a| a.eq_ignore_ascii_case(&normalized)) {
        return Ok(normalized);
    }

    Err(ValidationError::UnsupportedMimeType(content_type.to_string()))
}

/// `image/jpg` is a common non-standard alias for `image/jpeg`
fn canonical_mime(mime: &str) -> &str {
    match mime {
        "image/jpg" | "image/pjpeg" => "image/jpeg",
        other => other,
    }
}

/// Checks magic bytes to verify actual file type matches claimed type
pub fn verify_signature(header: &[u8], claimed_mime: &str) -> Result<(), ValidationError> {
    if header.is_empty() {
        return Err(ValidationError::EmptyFile);
    }

    if is_executable_content(header) {
        return Err(ValidationError::ExecutableContent);
    }

    let detected = infer::get(header).map(|kind| kind.mime_type());
    match detected {
        Some(detected) if canonical_mime(detected) == canonical_mime(claimed_mime) => Ok(()),
        other => Err(ValidationError::SignatureMismatch {
            claimed: claimed_mime.to_string(),
            detected: other.unwrap_or("unknown").to_string(),
        }),
    }
}

/// Checks if file content appears to be executable
pub fn is_executable_content(header: &[u8]) -> bool {
    // Shebang (shell scripts)
    if header.starts_with(b"#!") {
        return true;
    }

    // ELF, PE/COFF and Mach-O headers; infer needs a full header to match these
    const EXECUTABLE_MAGIC: &[&[u8]] = &[
        &[0x7F, 0x45, 0x4C, 0x46],
        &[0x4D, 0x5A],
        &[0xFE, 0xED, 0xFA, 0xCE],
        &[0xFE, 0xED, 0xFA, 0xCF],
        &[0xCE, 0xFA, 0xED, 0xFE],
        &[0xCF, 0xFA, 0xED, 0xFE],
    ];
    if EXECUTABLE_MAGIC.iter().any(|magic| header.starts_with(magic)) {
        return true;
    }

    infer::get(header)
        .map(|kind| kind.matcher_type() == infer::MatcherType::App)
        .unwrap_or(false)
}

/// Reduces a user-supplied name to a safe display name.
pub fn sanitize_filename(filename: &str) -> String {
    // Only the last component survives, whichever separator the client used
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .unwrap_or("");
    let name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|' | ';') {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return FALLBACK_FILENAME.to_string();
    }
    sanitized
}

/// Full validation pipeline for a candidate file.
/// Returns the normalized MIME type of the accepted file.
pub fn validate_upload(
    content_type: &str,
    payload: &[u8],
    max_size: usize,
    allowed: &[String],
    verify: bool,
) -> Result<String, ValidationError> {
    // 1. Size check
    validate_file_size(payload.len(), max_size)?;

    // 2. MIME type check
    let mime = validate_mime_type(content_type, allowed)?;

    // 3. Magic bytes verification
    if verify {
        verify_signature(payload, &mime)?;
    } else if is_executable_content(payload) {
        return Err(ValidationError::ExecutableContent);
    }

    Ok(mime)
}
