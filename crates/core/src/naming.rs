//! Deterministic artifact naming.
//!
//! Logical filenames on the record are decoupled from on-disk storage
//! names: the stored input is prefixed with the job id, the final output
//! is named after the sanitized input stem.

use std::path::Path;

/// Strip path separators and line breaks from a client-supplied filename.
///
/// Falls back to `default` when the result is empty.
///
/// # Examples
///
/// ```
/// use meshport_core::naming::sanitize_filename;
///
/// assert_eq!(sanitize_filename("a/b\\c.ifc", "model.ifc"), "a_b_c.ifc");
/// assert_eq!(sanitize_filename("  ", "model.ifc"), "model.ifc");
/// ```
pub fn sanitize_filename(name: &str, default: &str) -> String {
    let clean: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\n' | '\r' => '_',
            other => other,
        })
        .collect();
    if clean.is_empty() {
        default.to_string()
    } else {
        clean
    }
}

/// On-disk name of the uploaded input: `{job_id}_{sanitized}.ifc`.
///
/// The `.ifc` extension is appended when the sanitized name lacks it.
pub fn input_file_name(job_id: &str, input_name: Option<&str>) -> String {
    let mut name = sanitize_filename(input_name.unwrap_or("input.ifc"), "input.ifc");
    if !name.to_ascii_lowercase().ends_with(".ifc") {
        name.push_str(".ifc");
    }
    format!("{job_id}_{name}")
}

/// Final artifact name: the sanitized input stem with a `.usdz` extension.
pub fn output_file_name(input_name: Option<&str>) -> String {
    let source = sanitize_filename(input_name.unwrap_or("model.ifc"), "model.ifc");
    let stem = Path::new(&source)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("model");
    format!("{stem}.usdz")
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- sanitize_filename ----------------------------------------------------

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_filename("..\\..\\x.ifc", "d"), ".._.._x.ifc");
        assert_eq!(sanitize_filename("a/b.ifc", "d"), "a_b.ifc");
    }

    #[test]
    fn sanitize_replaces_line_breaks() {
        assert_eq!(sanitize_filename("a\nb\rc", "d"), "a_b_c");
    }

    #[test]
    fn sanitize_empty_falls_back_to_default() {
        assert_eq!(sanitize_filename("", "model.ifc"), "model.ifc");
        assert_eq!(sanitize_filename("   ", "model.ifc"), "model.ifc");
    }

    // -- input_file_name ------------------------------------------------------

    #[test]
    fn input_name_prefixed_with_job_id() {
        assert_eq!(
            input_file_name("j1", Some("demo.ifc")),
            "j1_demo.ifc"
        );
    }

    #[test]
    fn input_name_appends_missing_extension() {
        assert_eq!(input_file_name("j1", Some("demo")), "j1_demo.ifc");
        assert_eq!(input_file_name("j1", Some("demo.IFC")), "j1_demo.IFC");
    }

    #[test]
    fn input_name_defaults_when_absent() {
        assert_eq!(input_file_name("j1", None), "j1_input.ifc");
    }

    // -- output_file_name -----------------------------------------------------

    #[test]
    fn output_name_uses_input_stem() {
        assert_eq!(output_file_name(Some("demo.ifc")), "demo.usdz");
        assert_eq!(output_file_name(Some("tower model.ifc")), "tower model.usdz");
    }

    #[test]
    fn output_name_defaults_when_absent() {
        assert_eq!(output_file_name(None), "model.usdz");
        assert_eq!(output_file_name(Some("")), "model.usdz");
    }
}
