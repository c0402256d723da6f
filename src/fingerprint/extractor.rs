//! The extraction sequence that turns a filepath or title into a
//! [`Fingerprint`].

use tracing::debug;

use super::number::{
    fix_broken_year, normalize_string, process_issue_number, process_volume_number,
};
use super::patterns;
use super::{Fingerprint, METADATA_FILES, NumberSpan, SpecialVersion, file_extension,
    is_content_file, is_image_file};

/// Position sentinel meaning "not found"; larger than any realistic name.
const NOT_FOUND: usize = 10_000;

/// Options steering extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// If no volume number was found, assume `1`. When a series has only one
    /// volume the number is usually left out of the filename.
    pub assume_volume_number: bool,
    /// Use the year in the folder name instead of the one in the filename,
    /// if both are present.
    pub prefer_folder_year: bool,
    /// Repair years that are most likely a typo (`2204` -> `2024`).
    pub fix_year: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            assume_volume_number: true,
            prefer_folder_year: false,
            fix_year: false,
        }
    }
}

impl ExtractOptions {
    /// The option set used for aggregator release titles: no volume-number
    /// assumption, with year repair.
    #[must_use]
    pub fn release() -> Self {
        Self {
            assume_volume_number: false,
            prefer_folder_year: false,
            fix_year: true,
        }
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Slices `s` up to `pos`, backing off to the nearest char boundary.
fn prefix_upto(s: &str, pos: usize) -> &str {
    let mut pos = pos.min(s.len());
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    &s[..pos]
}

/// Blanks out every match of `re` with spaces of the same byte length, so
/// later span positions stay valid.
fn blank_out(re: &regex::Regex, s: &str) -> String {
    re.replace_all(s, |caps: &regex::Captures<'_>| " ".repeat(caps[0].len()))
        .into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    /// Python-style half-open overlap check against a candidate span.
    fn overlaps(self, other: Span) -> bool {
        (self.start <= other.start && other.start < self.end)
            || (self.start < other.end && other.end <= self.end)
    }
}

#[derive(Debug)]
struct IssueCandidate {
    number: String,
    span: Span,
}

/// Collects all matches of a fancy pattern in `text[pos..]`, keeping
/// absolute offsets. Look-behinds still see the text before `pos`.
fn collect_matches(
    re: &fancy_regex::Regex,
    text: &str,
    mut pos: usize,
) -> Vec<(Span, String, Span)> {
    let mut out = Vec::new();
    while pos <= text.len() {
        let Ok(Some(caps)) = re.captures_from_pos(text, pos) else {
            break;
        };
        let Some(full) = caps.get(0) else { break };
        if let Some(group) = caps.iter().skip(1).flatten().next() {
            out.push((
                Span {
                    start: full.start(),
                    end: full.end(),
                },
                group.as_str().to_string(),
                Span {
                    start: group.start(),
                    end: group.end(),
                },
            ));
        }
        pos = if full.end() > full.start() {
            full.end()
        } else {
            full.end() + 1
        };
    }
    out
}

/// Where to look for an issue number relative to the volume marker.
#[derive(Debug, Clone, Copy)]
enum SearchRegion {
    /// Only at and after the given offset.
    After(usize),
    /// Only before the given offset.
    Before(usize),
}

/// Runs the ordered issue patterns over one string part and returns the
/// first acceptable match.
///
/// Matches of the same pattern are ranked: ones whose text ends in a digit
/// beat letter-suffixed ones, earlier positions beat later ones. A match is
/// rejected when its span overlaps a year span or the special-version span.
fn find_issue_number(
    part: &str,
    region: SearchRegion,
    include_bare_number: bool,
    year_spans: &[Span],
    special_span: Option<Span>,
) -> Option<IssueCandidate> {
    let (text, pos): (&str, usize) = match region {
        SearchRegion::After(p) => (part, p.min(part.len())),
        SearchRegion::Before(p) => (prefix_upto(part, p), 0),
    };

    let numbered: [&fancy_regex::Regex; 5] = [
        &patterns::ISSUE_1,
        &patterns::ISSUE_2,
        &patterns::ISSUE_3,
        &patterns::ISSUE_4,
        &patterns::ISSUE_5,
    ];

    let mut pattern_sets: Vec<Vec<(Span, String, Span)>> = numbered
        .iter()
        .map(|re| collect_matches(re, text, pos))
        .collect();

    if include_bare_number {
        let mut bare = collect_matches(&patterns::ISSUE_6_START, text, pos);
        bare.extend(collect_matches(&patterns::ISSUE_6_PAGED, text, pos));
        bare.extend(collect_matches(&patterns::ISSUE_6_BARE, text, pos));
        pattern_sets.push(bare);
    }

    for mut matches in pattern_sets {
        matches.sort_by(|a, b| {
            let suffix = |m: &(Span, String, Span)| {
                usize::from(!m.1.chars().next_back().is_some_and(|c| c.is_ascii_digit()))
            };
            (suffix(a), a.0.start).cmp(&(suffix(b), b.0.start))
        });

        for (full, number, _group) in matches {
            let year_conflict = year_spans.iter().any(|y| y.overlaps(full));
            let special_conflict = special_span.is_some_and(|s| s.overlaps(full));
            if !year_conflict && !special_conflict {
                return Some(IssueCandidate { number, span: full });
            }
        }
    }

    None
}

/// Finds all year spans in a string and the chosen year value.
fn find_years(location: &str) -> (Option<i32>, Vec<Span>) {
    let mut year = None;
    let mut spans = Vec::new();
    for caps in patterns::YEAR.captures_iter(location) {
        if let Some(full) = caps.get(0) {
            spans.push(Span {
                start: full.start(),
                end: full.end(),
            });
        }
        if year.is_none() {
            year = caps
                .iter()
                .skip(1)
                .flatten()
                .next()
                .and_then(|m| m.as_str().parse::<i32>().ok());
        }
    }
    (year, spans)
}

/// Extracts comic data from a string and presents it in a formatted way.
///
/// The string can be a filepath, a bare filename or a release title; folder
/// components are consulted for data the filename itself lacks.
#[must_use]
pub fn extract_filename_data(filepath: &str, options: ExtractOptions) -> Fingerprint {
    debug!(input = filepath, "extracting filename data");

    let mut special_version: Option<SpecialVersion> = None;

    // A metadata filename itself carries no information; extract from the
    // containing folder instead.
    let mut filepath: String = filepath.to_string();
    if METADATA_FILES.contains(&basename(&filepath).to_lowercase().as_str()) {
        filepath = dirname(&filepath).to_string();
        special_version = Some(SpecialVersion::Metadata);
    }

    // Any explicit annual token without a "+ annuals" qualifier implies an
    // annual, whether it sits in the filename or the folder.
    let name_not_annual = patterns::NOT_ANNUAL
        .is_match(basename(&filepath))
        .unwrap_or(true);
    let folder_not_annual = patterns::NOT_ANNUAL
        .is_match(basename(dirname(&filepath)))
        .unwrap_or(true);
    let annual = !(name_not_annual && folder_not_annual);

    let mut filepath = normalize_string(&filepath).replace('+', " ");
    if filepath.contains('Т') || filepath.contains('т') {
        filepath = patterns::RUSSIAN_VOLUME
            .replace_all(&filepath, "Volume $1")
            .into_owned();
        filepath = patterns::RUSSIAN_VOLUME_REVERSED
            .replace_all(&filepath, "Volume $1")
            .into_owned();
    }
    if filepath.contains('第') || filepath.contains('卷') || filepath.contains('册') {
        filepath = patterns::CHINESE_VOLUME
            .replace_all(&filepath, "Volume $1")
            .into_owned();
        filepath = patterns::CHINESE_VOLUME_REVERSED
            .replace_all(&filepath, "Volume $1")
            .into_owned();
    }
    if filepath.contains('권') {
        filepath = patterns::KOREAN_VOLUME
            .replace_all(&filepath, "Volume $1")
            .into_owned();
    }
    if filepath.contains('巻') {
        filepath = patterns::JAPANESE_VOLUME
            .replace_all(&filepath, "Volume $1")
            .into_owned();
    }

    let image_file = is_image_file(&filepath);

    // Filename without a media extension; metadata extensions stay.
    let mut filename = basename(&filepath).to_string();
    if is_content_file(&filename) {
        if let Some(ext) = file_extension(&filename) {
            filename.truncate(filename.len() - ext.len() - 1);
        }
    }

    // Bracketed runs blanked out, offsets preserved.
    let clean_filename = blank_out(&patterns::STRIP_BRACKETS, &filename) + " ";

    let foldername = basename(dirname(&filepath)).to_string();
    let upper_foldername = basename(dirname(dirname(&filepath))).to_string();

    // Year: first hit in the configured location order wins, but spans are
    // recorded for both filename and folder so issue matching can avoid them.
    #[derive(Clone, Copy, PartialEq)]
    enum YearLocation {
        Name,
        Folder,
        Upper,
    }
    let mut year: Option<i32> = None;
    let mut year_spans: Vec<Span> = Vec::new();
    let mut year_folder_spans: Vec<Span> = Vec::new();

    let year_order: [(YearLocation, &str); 3] = if options.prefer_folder_year {
        [
            (YearLocation::Folder, &foldername),
            (YearLocation::Name, &filename),
            (YearLocation::Upper, &upper_foldername),
        ]
    } else {
        [
            (YearLocation::Name, &filename),
            (YearLocation::Folder, &foldername),
            (YearLocation::Upper, &upper_foldername),
        ]
    };
    for (location, text) in year_order {
        let (found, spans) = find_years(text);
        if spans.is_empty() {
            continue;
        }
        if year.is_none() {
            year = found;
        }
        match location {
            YearLocation::Name => year_spans = spans,
            YearLocation::Folder => year_folder_spans = spans,
            YearLocation::Upper => {}
        }
    }

    let first_year_pos = year_spans.first().map_or(NOT_FOUND, |s| s.start);
    let first_year_folder_pos = year_folder_spans.first().map_or(NOT_FOUND, |s| s.start);

    // Volume number: filename first, folder as fallback and series anchor.
    let mut volume_number: Option<NumberSpan<i32>> = None;
    let mut volume_pos = NOT_FOUND;
    let mut volume_end = 0usize;
    let mut volume_found_in_name = false;

    if !image_file {
        if let Ok(Some(caps)) = patterns::VOLUME.captures(&clean_filename) {
            if let (Some(full), Some(group)) = (caps.get(0), caps.get(1)) {
                volume_number = process_volume_number(group.as_str());
                volume_pos = full.start();
                volume_end = group.end();
                volume_found_in_name = true;
            }
        }
    }

    let mut volume_folder_pos = NOT_FOUND;
    let mut volume_folder_end = 0usize;
    let mut volume_found_in_folder = false;
    if let Ok(Some(caps)) = patterns::VOLUME_FOLDER.captures(&foldername) {
        if let Some(full) = caps.get(0) {
            volume_folder_pos = full.start();
            volume_folder_end = full.end();
            volume_found_in_folder = true;
            if !volume_found_in_name {
                let group = caps.get(1).or_else(|| caps.get(2));
                if let Some(group) = group {
                    volume_number = process_volume_number(group.as_str());
                }
            }
        }
    }

    if !volume_found_in_name && !volume_found_in_folder && options.assume_volume_number {
        volume_number = Some(NumberSpan::Single(1));
    }

    // Special version; a cover marker overrules TPB/OS/HC.
    let mut special_span: Option<Span> = None;
    let mut special_pos = NOT_FOUND;
    if special_version.is_none() {
        let cover_caps = patterns::COVER.captures(&filename).ok().flatten();
        if let Some(caps) = cover_caps {
            special_version = Some(SpecialVersion::Cover);
            let span = caps.get(1).or_else(|| caps.get(0));
            special_span = span.map(|m| Span {
                start: m.start(),
                end: m.end(),
            });
            special_pos = special_span.map_or(NOT_FOUND, |s| s.start);
        } else if let Ok(Some(caps)) = patterns::SPECIAL_VERSION.captures(&filename) {
            if caps.name("tpb").is_some() {
                special_version = Some(SpecialVersion::Tpb);
            } else if caps.name("one_shot").is_some() {
                special_version = Some(SpecialVersion::OneShot);
            } else if caps.name("hard_cover").is_some() {
                special_version = Some(SpecialVersion::HardCover);
            }
            special_pos = caps.get(0).map_or(NOT_FOUND, |m| m.start());
        }
    }

    // Issue number, unless a TPB/OS/HC token already settled the shape.
    let mut issue_number_text: Option<String> = None;
    let mut issue_pos = NOT_FOUND;
    let mut issue_folder_pos = NOT_FOUND;

    if matches!(
        special_version,
        None | Some(SpecialVersion::Cover) | Some(SpecialVersion::Metadata)
    ) {
        let (part, part_is_folder, after, before): (&str, bool, usize, usize) = if image_file {
            (&foldername, true, volume_folder_end, volume_folder_pos)
        } else {
            (&filename, false, volume_end, volume_pos)
        };
        let spans: &[Span] = if part_is_folder {
            &year_folder_spans
        } else {
            &year_spans
        };
        let special = if part_is_folder { None } else { special_span };

        let found = find_issue_number(part, SearchRegion::After(after), true, spans, special)
            .or_else(|| {
                find_issue_number(part, SearchRegion::Before(before), false, spans, special)
            });

        match found {
            Some(candidate) => {
                if part_is_folder {
                    issue_folder_pos = candidate.span.start;
                } else {
                    issue_pos = candidate.span.start;
                }
                issue_number_text = Some(candidate.number);
            }
            None if !image_file => {
                if let Ok(Some(caps)) = patterns::ISSUE_7.captures(clean_filename.trim_end()) {
                    if let (Some(full), Some(group)) = (caps.get(0), caps.get(1)) {
                        issue_number_text = Some(group.as_str().to_string());
                        issue_pos = full.start();
                    }
                }
            }
            None => {}
        }
    }

    if issue_number_text.is_none() && special_version.is_none() {
        special_version = Some(SpecialVersion::Tpb);
    }

    // Series name: everything left of the first structural span, falling
    // back to folder and grandparent folder when that yields nothing.
    let series_pos = first_year_pos
        .min(volume_pos)
        .min(special_pos)
        .min(issue_pos);

    let mut series_raw: Option<String> = None;
    if !image_file {
        let candidate = if series_pos >= NOT_FOUND {
            clean_filename.clone()
        } else if series_pos > 0 {
            prefix_upto(&clean_filename, series_pos - 1).to_string()
        } else {
            String::new()
        };
        if !candidate.trim().is_empty() {
            series_raw = Some(candidate);
        }
    }
    let series_raw = series_raw.unwrap_or_else(|| {
        let series_folder_pos = first_year_folder_pos
            .min(volume_folder_pos)
            .min(issue_folder_pos);
        let candidate = if series_folder_pos >= NOT_FOUND {
            foldername.clone()
        } else if series_folder_pos > 0 {
            prefix_upto(&foldername, series_folder_pos - 1).to_string()
        } else {
            String::new()
        };
        if candidate.trim().is_empty() {
            patterns::STRIP_BRACKETS
                .replace_all(&upper_foldername, "")
                .into_owned()
        } else {
            candidate
        }
    });

    let series_sep = series_raw.replace(['-', '_'], " ");
    let series = patterns::SERIES_CLEANUP
        .replace_all(&series_sep, "")
        .into_owned();

    let issue_number = issue_number_text
        .as_deref()
        .and_then(process_issue_number);

    let year = if options.fix_year {
        year.map(fix_broken_year)
    } else {
        year
    };

    let fingerprint = Fingerprint {
        series,
        year,
        volume_number,
        special_version,
        issue_number,
        annual,
    };
    debug!(?fingerprint, "extracted filename data");
    fingerprint
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn extract(path: &str) -> Fingerprint {
        extract_filename_data(path, ExtractOptions::default())
    }

    #[test]
    fn test_full_path_with_issue_range() {
        let f = extract("/Batman/Volume 1 (1940)/Batman (1940) Volume 2 Issue 11-25.zip");
        assert_eq!(f.series, "Batman");
        assert_eq!(f.year, Some(1940));
        assert_eq!(f.volume_number, Some(NumberSpan::Single(2)));
        assert_eq!(f.special_version, None);
        assert_eq!(f.issue_number, Some(NumberSpan::Range(11.0, 25.0)));
        assert!(!f.annual);
    }

    #[test]
    fn test_annuals_collection_defaults_to_tpb() {
        let f = extract("Avengers (1996) Volume 2 Annuals.zip");
        assert_eq!(f.series, "Avengers");
        assert_eq!(f.year, Some(1996));
        assert_eq!(f.volume_number, Some(NumberSpan::Single(2)));
        assert_eq!(f.special_version, Some(SpecialVersion::Tpb));
        assert_eq!(f.issue_number, None);
        assert!(f.annual);
    }

    #[test]
    fn test_simple_issue_number() {
        let f = extract("Invincible (2003) #5.cbz");
        assert_eq!(f.series, "Invincible");
        assert_eq!(f.year, Some(2003));
        assert_eq!(f.issue_number, Some(NumberSpan::Single(5.0)));
        assert_eq!(f.special_version, None);
    }

    #[test]
    fn test_half_issue_glyph() {
        let f = extract("Series Name #1½ (2010).cbr");
        assert_eq!(f.issue_number, Some(NumberSpan::Single(1.5)));
    }

    #[test]
    fn test_letter_suffix_issue() {
        let f = extract("Series Name #1a (2010).cbr");
        assert_eq!(f.issue_number, Some(NumberSpan::Single(1.01)));
    }

    #[test]
    fn test_roman_volume() {
        let f = extract("Series Name Vol. III (1985) TPB.cbz");
        assert_eq!(f.volume_number, Some(NumberSpan::Single(3)));
        assert_eq!(f.special_version, Some(SpecialVersion::Tpb));
    }

    #[test]
    fn test_tpb_token() {
        let f = extract("Maus TPB (1991).cbz");
        assert_eq!(f.special_version, Some(SpecialVersion::Tpb));
        assert_eq!(f.series, "Maus");
    }

    #[test]
    fn test_one_shot_token() {
        let f = extract("Eternals One-Shot (2006).cbz");
        assert_eq!(f.special_version, Some(SpecialVersion::OneShot));
    }

    #[test]
    fn test_cover_overrules_other_special_versions() {
        let f = extract("Series TPB Cover.jpg");
        assert_eq!(f.special_version, Some(SpecialVersion::Cover));
    }

    #[test]
    fn test_metadata_file_uses_folder() {
        let f = extract("/comics/Batgirl/Volume 4 (2011)/ComicInfo.xml");
        assert_eq!(f.special_version, Some(SpecialVersion::Metadata));
        assert_eq!(f.volume_number, Some(NumberSpan::Single(4)));
        assert_eq!(f.year, Some(2011));
    }

    #[test]
    fn test_year_fix_applied_on_request() {
        let f = extract_filename_data(
            "Series Name #3 (2204)",
            ExtractOptions {
                fix_year: true,
                ..ExtractOptions::default()
            },
        );
        assert_eq!(f.year, Some(2024));
    }

    #[test]
    fn test_issue_of_total_pattern() {
        let f = extract("Series Name 2 of 6 (2020).cbz");
        assert_eq!(f.issue_number, Some(NumberSpan::Single(2.0)));
    }

    #[test]
    fn test_assume_volume_number() {
        let f = extract("Series Name #4 (2020).cbz");
        assert_eq!(f.volume_number, Some(NumberSpan::Single(1)));

        let f = extract_filename_data(
            "Series Name #4 (2020).cbz",
            ExtractOptions {
                assume_volume_number: false,
                ..ExtractOptions::default()
            },
        );
        assert_eq!(f.volume_number, None);
    }

    #[test]
    fn test_russian_volume_marker() {
        let f = extract("Серия Том 3 (2015).cbz");
        assert_eq!(f.volume_number, Some(NumberSpan::Single(3)));
    }

    #[test]
    fn test_image_file_issue_from_folder() {
        let f = extract("/comics/Series Name/Volume 2 (1999)/Issue 05/page-003.jpg");
        assert_eq!(f.issue_number, Some(NumberSpan::Single(5.0)));
        // Only the direct parent is consulted for the volume marker; the year
        // still comes from further up.
        assert_eq!(f.volume_number, Some(NumberSpan::Single(1)));
        assert_eq!(f.year, Some(1999));
    }

    #[test]
    fn test_year_excluded_from_issue_candidates() {
        // The year 1940 must not be mistaken for an issue number.
        let f = extract("Batman 1940 #12.cbz");
        assert_eq!(f.issue_number, Some(NumberSpan::Single(12.0)));
    }

    #[test]
    fn test_bare_filename_number() {
        let f = extract("/comics/Series Name/Volume 1/05.cbz");
        assert_eq!(f.issue_number, Some(NumberSpan::Single(5.0)));
        assert_eq!(f.series, "Series Name");
    }
}
