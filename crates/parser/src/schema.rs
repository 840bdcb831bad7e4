//! Document schema versioning.
//!
//! Documents may declare `schema: "1"`, `"1.2"` or `"1.2.3"`. Any version
//! compatible with [`SUPPORTED`] is accepted.

use semver::{Version, VersionReq};

use systest_core::error::ParseErrorKind;

/// Schema versions this parser understands.
pub const SUPPORTED: &str = "^1";

/// Current schema version, used when a document declares none.
pub const CURRENT: &str = "1.0.0";

/// Validates a declared schema version.
pub fn check(declared: &str) -> Result<Version, ParseErrorKind> {
    let version = normalize(declared)?;
    let req = VersionReq::parse(SUPPORTED).map_err(|e| unsupported(declared, e.to_string()))?;
    if !req.matches(&version) {
        return Err(unsupported(
            declared,
            format!("this parser supports {SUPPORTED}"),
        ));
    }
    Ok(version)
}

/// Pads `1` and `1.2` to full semver.
fn normalize(declared: &str) -> Result<Version, ParseErrorKind> {
    let trimmed = declared.trim();
    let dots = trimmed.matches('.').count();
    let padded = match dots {
        0 => format!("{trimmed}.0.0"),
        1 => format!("{trimmed}.0"),
        _ => trimmed.to_owned(),
    };
    Version::parse(&padded).map_err(|e| unsupported(declared, e.to_string()))
}

fn unsupported(version: &str, reason: String) -> ParseErrorKind {
    ParseErrorKind::UnsupportedSchema {
        version: version.to_owned(),
        reason,
    }
}
