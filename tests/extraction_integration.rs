//! Integration tests for the filename extractor: the full scenarios a
//! release title or library path goes through.

use longbox_core::fingerprint::{
    ExtractOptions, NumberSpan, SpecialVersion, extract_filename_data, process_issue_number,
    process_volume_number,
};

fn extract(input: &str) -> longbox_core::Fingerprint {
    extract_filename_data(input, ExtractOptions::default())
}

fn extract_release(input: &str) -> longbox_core::Fingerprint {
    extract_filename_data(input, ExtractOptions::release())
}

#[test]
fn full_library_path_with_issue_range() {
    let f = extract("/Batman/Volume 1 (1940)/Batman (1940) Volume 2 Issue 11-25.zip");
    assert_eq!(f.series, "Batman");
    assert_eq!(f.year, Some(1940));
    assert_eq!(f.volume_number, Some(NumberSpan::Single(2)));
    assert_eq!(f.special_version, None);
    assert_eq!(f.issue_number, Some(NumberSpan::Range(11.0, 25.0)));
    assert!(!f.annual);
}

#[test]
fn annuals_collection_without_issue_number_is_tpb() {
    let f = extract("Avengers (1996) Volume 2 Annuals.zip");
    assert_eq!(f.series, "Avengers");
    assert_eq!(f.year, Some(1996));
    assert_eq!(f.volume_number, Some(NumberSpan::Single(2)));
    assert_eq!(f.special_version, Some(SpecialVersion::Tpb));
    assert_eq!(f.issue_number, None);
    assert!(f.annual);
}

#[test]
fn plus_annuals_is_not_an_annual() {
    let f = extract("Avengers (1996) Volume 2 + Annuals.zip");
    assert!(!f.annual);
}

#[test]
fn broken_year_is_fixed_only_on_request() {
    let with_fix = extract_release("Series Name #3 (2204)");
    assert_eq!(with_fix.year, Some(2024));

    let without_fix = extract("Series Name #3 (2204)");
    assert_eq!(without_fix.year, Some(2204));

    // Outside the swapped-digit heuristic.
    let old = extract_release("Series Name #3 (1889)");
    assert_eq!(old.year, Some(1889));
}

#[test]
fn issue_number_glyphs_and_suffixes() {
    assert_eq!(process_issue_number("1½"), Some(NumberSpan::Single(1.5)));
    assert_eq!(process_issue_number("1a"), Some(NumberSpan::Single(1.01)));
    assert_eq!(
        process_issue_number("1a-5b"),
        Some(NumberSpan::Range(1.01, 5.02))
    );
    assert_eq!(process_issue_number("-12"), Some(NumberSpan::Single(-12.0)));
}

#[test]
fn roman_volume_numbers() {
    assert_eq!(process_volume_number("III"), Some(NumberSpan::Single(3)));
    let f = extract("Series Name Vol. III (1985).cbz");
    assert_eq!(f.volume_number, Some(NumberSpan::Single(3)));
}

#[test]
fn volume_as_issue_release_title_extracts_volume_and_tpb() {
    // The group filter later reinterprets this for volume-as-issue
    // volumes; extraction itself sees a TPB of volume 5.
    let f = extract_release("Monogatari Volume 5 TPB");
    assert_eq!(f.volume_number, Some(NumberSpan::Single(5)));
    assert_eq!(f.special_version, Some(SpecialVersion::Tpb));
    assert_eq!(f.issue_number, None);
}

#[test]
fn release_titles_do_not_assume_a_volume_number() {
    let f = extract_release("Spawn #220");
    assert_eq!(f.volume_number, None);
    assert_eq!(f.issue_number, Some(NumberSpan::Single(220.0)));
}

#[test]
fn cover_marker_wins_over_special_versions() {
    let f = extract("Series TPB Cover.jpg");
    assert_eq!(f.special_version, Some(SpecialVersion::Cover));

    let f = extract("Series hard cover (2010).cbz");
    assert_eq!(f.special_version, Some(SpecialVersion::HardCover));
}

#[test]
fn metadata_files_extract_from_their_folder() {
    for name in ["ComicInfo.xml", "series.json", "cvinfo.xml"] {
        let f = extract(&format!("/library/Saga/Volume 02 (2013)/{name}"));
        assert_eq!(f.special_version, Some(SpecialVersion::Metadata), "{name}");
        assert_eq!(f.volume_number, Some(NumberSpan::Single(2)), "{name}");
        assert_eq!(f.year, Some(2013), "{name}");
    }
}

#[test]
fn year_spans_are_excluded_from_issue_candidates() {
    let f = extract("2000 AD (1977) #455.cbz");
    assert_eq!(f.issue_number, Some(NumberSpan::Single(455.0)));
    assert_eq!(f.year, Some(1977));
}

#[test]
fn foreign_volume_markers_are_translated() {
    assert_eq!(
        extract("Серия Том 3.cbz").volume_number,
        Some(NumberSpan::Single(3))
    );
    assert_eq!(
        extract("某系列 第4卷.cbz").volume_number,
        Some(NumberSpan::Single(4))
    );
    assert_eq!(
        extract("시리즈 제2권.cbz").volume_number,
        Some(NumberSpan::Single(2))
    );
}

#[test]
fn n_of_m_and_bare_number_patterns() {
    let f = extract("Series Name 3 of 6 (2021).cbz");
    assert_eq!(f.issue_number, Some(NumberSpan::Single(3.0)));

    let f = extract("/library/Series Name/Volume 1/07.cbz");
    assert_eq!(f.issue_number, Some(NumberSpan::Single(7.0)));
    assert_eq!(f.series, "Series Name");
}
