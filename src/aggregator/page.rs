//! Parsing aggregator search-result pages and article pages.

use scraper::{ElementRef, Html, Selector};

use crate::fingerprint::{ExtractOptions, Fingerprint, extract_filename_data, fix_broken_year};
use crate::source::DownloadSource;

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css:?}: {e:?}"))
}

/// An article stub on a search-result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleStub {
    pub link: String,
    pub title: String,
}

/// A download group as parsed from an article, before blocklist and
/// availability filtering.
#[derive(Debug, Clone)]
pub struct RawGroup {
    pub web_sub_title: String,
    pub fingerprint: Fingerprint,
    /// Per-source link lists, in page order.
    pub links: Vec<(DownloadSource, Vec<String>)>,
}

impl RawGroup {
    fn push_link(&mut self, source: DownloadSource, href: String) {
        if let Some((_, links)) = self.links.iter_mut().find(|(s, _)| *s == source) {
            if !links.contains(&href) {
                links.push(href);
            }
        } else {
            self.links.push((source, vec![href]));
        }
    }
}

/// Extracts the article stubs from a search-result page.
#[must_use]
pub fn parse_search_results(html: &str) -> Vec<ArticleStub> {
    let document = Html::parse_document(html);
    let article_selector = selector("article.post");
    let link_selector = selector("a");
    let title_selector = selector("h1.post-title");

    let mut stubs = Vec::new();
    for article in document.select(&article_selector) {
        let Some(link) = article
            .select(&link_selector)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let Some(title) = article
            .select(&title_selector)
            .next()
            .map(|h| h.text().collect::<String>().trim().to_string())
        else {
            continue;
        };
        stubs.push(ArticleStub {
            link: link.to_string(),
            title,
        });
    }
    stubs
}

/// The total page count of a search, read from the last page-numbers
/// element. A page without pagination is a single page.
#[must_use]
pub fn parse_max_page(html: &str) -> usize {
    let document = Html::parse_document(html);
    let page_selector = selector("a.page-numbers, span.page-numbers");

    document
        .select(&page_selector)
        .last()
        .and_then(|el| {
            el.text()
                .collect::<String>()
                .trim()
                .replace([',', '.'], "")
                .parse::<usize>()
                .ok()
        })
        .unwrap_or(1)
}

/// The article's own title.
#[must_use]
pub fn parse_article_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let h1 = selector("h1");
    document
        .select(&h1)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

/// Extracts the download groups of an article page: the button blocks and
/// the list blocks.
#[must_use]
pub fn parse_article_groups(html: &str) -> Vec<RawGroup> {
    let document = Html::parse_document(html);
    let body_selector = selector("section.post-contents");
    let Some(body) = document.select(&body_selector).next() else {
        return Vec::new();
    };

    let mut groups = extract_button_groups(body);
    groups.extend(extract_list_groups(body));
    groups.retain(|g| !g.links.is_empty());
    groups
}

fn release_fingerprint(title: &str) -> Fingerprint {
    extract_filename_data(title, ExtractOptions::release())
}

fn first_text_chunk(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn classify_link(text: &str, href: &str) -> Option<DownloadSource> {
    if href.is_empty() || href.starts_with("https://sh.st/") {
        return None;
    }
    DownloadSource::from_link_text(text)
}

/// Button blocks: a paragraph mentioning "Language" heads a group; the
/// following siblings up to an `hr` carry the buttons.
fn extract_button_groups(body: ElementRef<'_>) -> Vec<RawGroup> {
    let paragraph_selector = selector("p");
    let nested_paragraph = selector("p");
    let button_anchor = selector("div.aio-button-center a");
    let anchor = selector("a");

    let mut groups = Vec::new();
    for paragraph in body.select(&paragraph_selector) {
        let joined: Vec<String> = paragraph
            .text()
            .map(str::to_string)
            .collect();
        if !joined.iter().any(|t| t.contains("Language")) {
            continue;
        }
        if paragraph.select(&nested_paragraph).next().is_some() {
            continue;
        }

        let title = first_text_chunk(paragraph);
        let mut fingerprint = release_fingerprint(&title);
        if fingerprint.special_version == Some(crate::fingerprint::SpecialVersion::Cover) {
            continue;
        }

        // The header sometimes exposes the year as its own field when the
        // title itself has none.
        if fingerprint.year.is_none() {
            if let Some(year) = year_field(&joined) {
                fingerprint.year = Some(fix_broken_year(year));
            }
        }

        let mut group = RawGroup {
            web_sub_title: title,
            fingerprint,
            links: Vec::new(),
        };

        for sibling in paragraph.next_siblings() {
            let Some(element) = ElementRef::wrap(sibling) else {
                continue;
            };
            if element.value().name() == "hr" {
                break;
            }

            let buttons: Vec<ElementRef<'_>> = if element.value().name() == "div"
                && element
                    .value()
                    .attr("class")
                    .is_some_and(|c| c.contains("aio-button-center"))
            {
                element.select(&anchor).collect()
            } else {
                element.select(&button_anchor).collect()
            };

            for button in buttons {
                let Some(href) = button.value().attr("href") else {
                    continue;
                };
                let text = button.text().collect::<String>().trim().to_lowercase();
                if let Some(source) = classify_link(&text, href) {
                    group.push_link(source, href.to_string());
                }
            }
        }

        groups.push(group);
    }
    groups
}

/// List blocks: `li` elements under a `ul` whose anchors are link buttons.
fn extract_list_groups(body: ElementRef<'_>) -> Vec<RawGroup> {
    let item_selector = selector("ul > li");
    let anchor = selector("a");

    let mut groups = Vec::new();
    for item in body.select(&item_selector) {
        if item.select(&anchor).next().is_none() {
            continue;
        }

        let title = first_text_chunk(item);
        let fingerprint = release_fingerprint(&title);
        if fingerprint.special_version == Some(crate::fingerprint::SpecialVersion::Cover) {
            continue;
        }

        let mut group = RawGroup {
            web_sub_title: title,
            fingerprint,
            links: Vec::new(),
        };

        for link in item.select(&anchor) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let text = link.text().collect::<String>().trim().to_lowercase();
            if let Some(source) = classify_link(&text, href) {
                group.push_link(source, href.to_string());
            }
        }

        groups.push(group);
    }
    groups
}

/// Reads a `Year : YYYY` field out of the header's text chunks.
fn year_field(chunks: &[String]) -> Option<i32> {
    for chunk in chunks {
        let Some(index) = chunk.find("Year") else {
            continue;
        };
        let after = chunk[index + 4..].trim_start_matches([' ', ':', '\u{a0}']);
        let candidate = after
            .split('|')
            .next()
            .unwrap_or_default()
            .split('-')
            .next()
            .unwrap_or_default()
            .trim()
            .replace('\u{a0}', "");
        if let Ok(year) = candidate.parse::<i32>() {
            return Some(year);
        }
    }
    None
}
