//! Rendering volume-folder and file names from the configured templates.
//!
//! Templates are plain strings with `{placeholder}` keys from a closed set.
//! Keys that have no value in a given context render as the empty string;
//! path separators inside templates create subfolders. Every rendered name
//! is sanitized for the filesystem. Template changes are validated by
//! rendering mock data and rejecting templates whose output collides across
//! different inputs.

mod rename;

pub use rename::{RenameError, mass_rename};

use thiserror::Error;

use crate::fingerprint::NumberSpan;
use crate::library::{IssueData, VolumeData, fsops::make_filename_safe};
use crate::settings::Settings;
use crate::fingerprint::SpecialVersion;

/// Which template a key set or error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    VolumeFolder,
    File,
    FileEmpty,
    FileSpecialVersion,
    FileVai,
}

impl TemplateKind {
    /// The settings key carrying this template.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::VolumeFolder => "volume_folder_naming",
            Self::File => "file_naming",
            Self::FileEmpty => "file_naming_empty",
            Self::FileSpecialVersion => "file_naming_special_version",
            Self::FileVai => "file_naming_vai",
        }
    }

    fn allowed_keys(self) -> &'static [&'static str] {
        const BASE: &[&str] = &[
            "series_name",
            "clean_series_name",
            "volume_number",
            "comicvine_id",
            "year",
            "publisher",
        ];
        const ISSUE: &[&str] = &[
            "series_name",
            "clean_series_name",
            "volume_number",
            "comicvine_id",
            "year",
            "publisher",
            "special_version",
            "issue_comicvine_id",
            "issue_number",
            "issue_title",
            "issue_release_date",
            "issue_release_year",
        ];
        match self {
            Self::VolumeFolder => BASE,
            _ => ISSUE,
        }
    }
}

/// A template failed validation.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("unknown placeholder {{{placeholder}}}")]
    UnknownPlaceholder {
        kind: TemplateKind,
        placeholder: String,
    },

    #[error("unbalanced braces")]
    UnbalancedBraces { kind: TemplateKind },

    #[error("output does not distinguish different {what}")]
    Colliding { kind: TemplateKind, what: &'static str },
}

impl TemplateError {
    /// The settings key of the offending template.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::UnknownPlaceholder { kind, .. }
            | Self::UnbalancedBraces { kind }
            | Self::Colliding { kind, .. } => kind.key(),
        }
    }
}

/// Renders `template`, resolving placeholders through `value_of`. Unknown
/// placeholders resolve to an error; known-but-absent values must be
/// rendered as `""` by the callback.
fn render_template(
    kind: TemplateKind,
    template: &str,
    value_of: &dyn Fn(&str) -> Option<String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(TemplateError::UnbalancedBraces { kind });
        };
        let placeholder = &after[..close];
        if !kind.allowed_keys().contains(&placeholder) {
            return Err(TemplateError::UnknownPlaceholder {
                kind,
                placeholder: placeholder.to_string(),
            });
        }
        if let Some(value) = value_of(placeholder) {
            out.push_str(&value);
        }
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(TemplateError::UnbalancedBraces { kind });
    }
    out.push_str(rest);
    Ok(out)
}

/// Zero-pads the integer part of a calculated number, keeping a trimmed
/// fraction (`5.5` with width 3 renders as `005.5`).
#[must_use]
pub fn pad_calc_number(n: f64, width: u8) -> String {
    let negative = n < 0.0;
    let abs = n.abs();
    let int = abs.trunc() as i64;
    let frac = abs - abs.trunc();

    let mut out = format!("{int:0w$}", w = width as usize);
    if frac > 1e-9 {
        let frac_str = format!("{frac:.2}");
        let trimmed = frac_str
            .trim_start_matches('0')
            .trim_end_matches('0')
            .trim_end_matches('.');
        out.push_str(trimmed);
    }
    if negative { format!("-{out}") } else { out }
}

/// Renders an issue span as `a` or `a-b` with both sides padded.
#[must_use]
pub fn format_issue_span(span: NumberSpan<f64>, width: u8) -> String {
    match span {
        NumberSpan::Single(n) => pad_calc_number(n, width),
        NumberSpan::Range(a, b) => {
            format!("{}-{}", pad_calc_number(a, width), pad_calc_number(b, width))
        }
    }
}

/// The rendered text for a special version, long or short form.
#[must_use]
pub fn special_version_text(sv: Option<SpecialVersion>, long: bool) -> String {
    let text = match (sv, long) {
        (Some(SpecialVersion::HardCover), false) => "HC",
        (Some(SpecialVersion::HardCover), true) => "Hard-Cover",
        (Some(SpecialVersion::OneShot), false) => "OS",
        (Some(SpecialVersion::OneShot), true) => "One-Shot",
        (Some(SpecialVersion::Tpb), _) => "TPB",
        (Some(SpecialVersion::Cover), _) => "Cover",
        _ => "",
    };
    text.to_string()
}

/// The series title with characters that are awkward in filenames dropped.
#[must_use]
pub fn clean_series_name(title: &str) -> String {
    title
        .chars()
        .filter(|c| !matches!(c, ':' | '?' | '!' | ',' | '/' | '\\'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn base_value(volume: &VolumeData, settings: &Settings, key: &str) -> Option<String> {
    match key {
        "series_name" => Some(volume.title.clone()),
        "clean_series_name" => Some(clean_series_name(&volume.title)),
        "volume_number" => Some(format!(
            "{:0w$}",
            volume.volume_number,
            w = settings.volume_padding as usize
        )),
        "comicvine_id" => Some(volume.comicvine_id.to_string()),
        "year" => Some(volume.year.map(|y| y.to_string()).unwrap_or_default()),
        "publisher" => Some(volume.publisher.clone().unwrap_or_default()),
        _ => None,
    }
}

/// Renders the volume folder name (relative to the root folder).
///
/// # Errors
///
/// Returns [`TemplateError`] when the configured template is broken; a
/// validated settings document never produces one.
pub fn generate_volume_folder_name(
    volume: &VolumeData,
    settings: &Settings,
) -> Result<String, TemplateError> {
    let rendered = render_template(
        TemplateKind::VolumeFolder,
        &settings.volume_folder_naming,
        &|key| base_value(volume, settings, key),
    )?;
    Ok(make_filename_safe(rendered.trim()))
}

/// Renders the filename body (no extension) for a file covering `covered`
/// issues of the volume. `covered_issues` carries the issue rows the span
/// maps to, for title/date keys.
///
/// # Errors
///
/// Returns [`TemplateError`] when the configured template is broken; a
/// validated settings document never produces one.
pub fn generate_issue_name(
    volume: &VolumeData,
    covered: Option<NumberSpan<f64>>,
    covered_issues: &[IssueData],
    settings: &Settings,
) -> Result<String, TemplateError> {
    let (kind, template): (TemplateKind, &str) = match volume.special_version {
        Some(SpecialVersion::Tpb | SpecialVersion::OneShot | SpecialVersion::HardCover) => (
            TemplateKind::FileSpecialVersion,
            &settings.file_naming_special_version,
        ),
        Some(SpecialVersion::VolumeAsIssue) => (TemplateKind::FileVai, &settings.file_naming_vai),
        _ => (TemplateKind::File, &settings.file_naming),
    };

    let single_issue = match covered {
        Some(NumberSpan::Single(_)) => covered_issues.first(),
        _ => None,
    };

    let rendered = render_template(kind, template, &|key| {
        if let Some(value) = base_value(volume, settings, key) {
            return Some(value);
        }
        match key {
            "special_version" => Some(special_version_text(
                volume.special_version,
                settings.long_special_version,
            )),
            "issue_comicvine_id" => Some(
                single_issue
                    .map(|i| i.comicvine_id.to_string())
                    .unwrap_or_default(),
            ),
            "issue_number" => Some(
                covered
                    .map(|span| format_issue_span(span, settings.issue_padding))
                    .unwrap_or_default(),
            ),
            "issue_title" => Some(issue_title_text(covered, covered_issues)),
            "issue_release_date" => Some(
                single_issue
                    .and_then(|i| i.date.clone())
                    .unwrap_or_default(),
            ),
            "issue_release_year" => Some(
                single_issue
                    .and_then(|i| crate::fingerprint::extract_year_from_date(i.date.as_deref()))
                    .map(|y| y.to_string())
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    })?;

    Ok(make_filename_safe(rendered.trim()))
}

fn issue_title_text(covered: Option<NumberSpan<f64>>, covered_issues: &[IssueData]) -> String {
    match covered {
        Some(NumberSpan::Single(_)) => covered_issues
            .first()
            .and_then(|i| i.title.clone())
            .unwrap_or_default(),
        Some(NumberSpan::Range(_, _)) => {
            let first = covered_issues.first().and_then(|i| i.title.as_deref());
            let last = covered_issues.last().and_then(|i| i.title.as_deref());
            match (first, last) {
                (Some(a), Some(b)) => format!("{a} - {b}"),
                _ => String::new(),
            }
        }
        None => String::new(),
    }
}

/// Validates every naming template in the settings document.
///
/// # Errors
///
/// Returns the first [`TemplateError`] found.
pub fn validate_templates(settings: &Settings) -> Result<(), TemplateError> {
    let mock_a = mock_volume(1, "Mock Series", 1);
    let mock_b = mock_volume(2, "Other Series", 2);

    let folder_a = generate_volume_folder_name(&mock_a, settings)?;
    let folder_b = generate_volume_folder_name(&mock_b, settings)?;
    if folder_a == folder_b {
        return Err(TemplateError::Colliding {
            kind: TemplateKind::VolumeFolder,
            what: "volumes",
        });
    }

    let issue_1 = mock_issue(1, 1.0);
    let issue_2 = mock_issue(2, 2.0);
    for (kind, sv) in [
        (TemplateKind::File, None),
        (TemplateKind::FileEmpty, None),
        (
            TemplateKind::FileVai,
            Some(SpecialVersion::VolumeAsIssue),
        ),
    ] {
        let mut volume = mock_volume(1, "Mock Series", 1);
        volume.special_version = sv;
        let template = match kind {
            TemplateKind::File => &settings.file_naming,
            TemplateKind::FileEmpty => &settings.file_naming_empty,
            _ => &settings.file_naming_vai,
        };
        let name_1 = render_file_for_validation(
            kind,
            template,
            &volume,
            Some(NumberSpan::Single(1.0)),
            &[issue_1.clone()],
            settings,
        )?;
        let name_2 = render_file_for_validation(
            kind,
            template,
            &volume,
            Some(NumberSpan::Single(2.0)),
            &[issue_2.clone()],
            settings,
        )?;
        if name_1 == name_2 {
            return Err(TemplateError::Colliding { kind, what: "issues" });
        }
    }

    // The special-version template only has to keep volumes apart.
    let mut sv_volume_a = mock_a.clone();
    sv_volume_a.special_version = Some(SpecialVersion::Tpb);
    let mut sv_volume_b = mock_b.clone();
    sv_volume_b.special_version = Some(SpecialVersion::Tpb);
    let name_a = generate_issue_name(&sv_volume_a, None, &[], settings)?;
    let name_b = generate_issue_name(&sv_volume_b, None, &[], settings)?;
    if name_a == name_b {
        return Err(TemplateError::Colliding {
            kind: TemplateKind::FileSpecialVersion,
            what: "volumes",
        });
    }

    Ok(())
}

fn render_file_for_validation(
    kind: TemplateKind,
    template: &str,
    volume: &VolumeData,
    covered: Option<NumberSpan<f64>>,
    covered_issues: &[IssueData],
    settings: &Settings,
) -> Result<String, TemplateError> {
    // Reuses the real issue renderer for the fitting special version, and a
    // raw render (same value sources) for the empty-slot template.
    match kind {
        TemplateKind::FileEmpty => {
            let mut patched = settings.clone();
            patched.file_naming = template.to_string();
            let mut plain = volume.clone();
            plain.special_version = None;
            generate_issue_name(&plain, covered, covered_issues, &patched)
        }
        _ => generate_issue_name(volume, covered, covered_issues, settings),
    }
}

fn mock_volume(id: i64, title: &str, volume_number: i32) -> VolumeData {
    VolumeData {
        id,
        comicvine_id: 4000 + id,
        title: title.to_string(),
        alt_title: None,
        year: Some(2000 + id as i32),
        publisher: Some("Mock Publisher".to_string()),
        volume_number,
        description: None,
        folder: String::new(),
        root_folder: 1,
        monitored: true,
        special_version: None,
        special_version_locked: false,
        last_cv_fetch: 0,
    }
}

fn mock_issue(id: i64, number: f64) -> IssueData {
    IssueData {
        id,
        volume_id: 1,
        comicvine_id: 9000 + id,
        issue_number: number.to_string(),
        calculated_issue_number: number,
        title: Some(format!("Mock Issue {id}")),
        date: Some("2004-06-01".to_string()),
        description: None,
        monitored: true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fingerprint::{ExtractOptions, extract_filename_data};

    fn volume() -> VolumeData {
        let mut v = mock_volume(1, "Paper Girls", 1);
        v.year = Some(2015);
        v
    }

    #[test]
    fn test_pad_calc_number() {
        assert_eq!(pad_calc_number(5.0, 3), "005");
        assert_eq!(pad_calc_number(5.5, 2), "05.5");
        assert_eq!(pad_calc_number(12.0, 1), "12");
        assert_eq!(pad_calc_number(-3.0, 2), "-03");
    }

    #[test]
    fn test_format_issue_span_range() {
        assert_eq!(
            format_issue_span(NumberSpan::Range(1.0, 10.0), 3),
            "001-010"
        );
    }

    #[test]
    fn test_volume_folder_name_default_template() {
        let name = generate_volume_folder_name(&volume(), &Settings::default()).unwrap();
        assert_eq!(name, "Paper Girls/Volume 01 (2015)");
    }

    #[test]
    fn test_issue_name_default_template() {
        let issue = mock_issue(1, 4.0);
        let name = generate_issue_name(
            &volume(),
            Some(NumberSpan::Single(4.0)),
            &[issue],
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(name, "Paper Girls (2015) Volume 01 Issue 004");
    }

    #[test]
    fn test_special_version_name_short_and_long() {
        let mut v = volume();
        v.special_version = Some(SpecialVersion::OneShot);

        let name = generate_issue_name(&v, None, &[], &Settings::default()).unwrap();
        assert_eq!(name, "Paper Girls (2015) Volume 01 OS");

        let mut settings = Settings::default();
        settings.long_special_version = true;
        let name = generate_issue_name(&v, None, &[], &settings).unwrap();
        assert_eq!(name, "Paper Girls (2015) Volume 01 One-Shot");
    }

    #[test]
    fn test_vai_name_uses_issue_slot() {
        let mut v = volume();
        v.special_version = Some(SpecialVersion::VolumeAsIssue);
        let name = generate_issue_name(
            &v,
            Some(NumberSpan::Single(5.0)),
            &[],
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(name, "Paper Girls (2015) Volume 005");
    }

    #[test]
    fn test_sanitization_strips_illegal_chars() {
        let mut v = volume();
        v.title = "What If..? <Special>".to_string();
        let name = generate_volume_folder_name(&v, &Settings::default()).unwrap();
        assert!(!name.contains('<'));
        assert!(!name.contains('?'));
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let mut settings = Settings::default();
        settings.file_naming = "{series_name} {bogus}".to_string();
        assert!(matches!(
            validate_templates(&settings),
            Err(TemplateError::UnknownPlaceholder { .. })
        ));
    }

    #[test]
    fn test_colliding_template_rejected() {
        let mut settings = Settings::default();
        settings.file_naming = "{series_name}".to_string();
        assert!(matches!(
            validate_templates(&settings),
            Err(TemplateError::Colliding { .. })
        ));
    }

    #[test]
    fn test_render_extract_round_trip() {
        let issue = mock_issue(1, 4.0);
        let settings = Settings::default();
        let v = volume();

        let name = generate_issue_name(&v, Some(NumberSpan::Single(4.0)), &[issue], &settings)
            .unwrap();
        let fingerprint =
            extract_filename_data(&format!("{name}.cbz"), ExtractOptions::default());

        assert_eq!(fingerprint.series, "Paper Girls");
        assert_eq!(fingerprint.year, Some(2015));
        assert_eq!(fingerprint.volume_number, Some(NumberSpan::Single(1)));
        assert_eq!(fingerprint.issue_number, Some(NumberSpan::Single(4.0)));
        assert_eq!(fingerprint.special_version, None);
    }

    #[test]
    fn test_render_extract_round_trip_range() {
        let settings = Settings::default();
        let v = volume();

        let name = generate_issue_name(
            &v,
            Some(NumberSpan::Range(1.0, 10.0)),
            &[mock_issue(1, 1.0), mock_issue(2, 10.0)],
            &settings,
        )
        .unwrap();
        let fingerprint =
            extract_filename_data(&format!("{name}.cbz"), ExtractOptions::default());

        assert_eq!(fingerprint.issue_number, Some(NumberSpan::Range(1.0, 10.0)));
    }
}
