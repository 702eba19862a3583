//! Patent page fetching.
//!
//! Google Patents pages carry the title in `og:title`, the abstract in
//! `div.abstract` and the publication number in the URL path.

use std::sync::LazyLock;

use careerkb_shared::{CareerKbError, HttpConfig, Result};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{info, instrument};

use crate::http::{build_client, element_text, fetch_page, parse_url};

static TITLE_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*-\s*Google\s+Patents\s*$").expect("valid regex"));

static TITLE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:US|EP|WO)[\d,]+[A-Z]\d*\s+-\s+").expect("valid regex"));

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:US|EP|WO)[\d,]+[A-Z]\d*").expect("valid regex"));

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})(?:-(\d{2}))?").expect("valid regex"));

/// Metadata recovered from a patent page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatentPage {
    pub url: String,
    pub title: String,
    pub abstract_text: Option<String>,
    pub number: Option<String>,
    /// `YYYY-MM` or `YYYY`.
    pub date: Option<String>,
}

impl PatentPage {
    /// Render as a single-entry patents document.
    pub fn to_document_text(&self) -> String {
        let mut header = self.title.clone();
        if let Some(number) = &self.number {
            header.push_str(&format!(" ({number})"));
        }
        if let Some(date) = &self.date {
            header.push_str(&format!(", {date}"));
        }
        let mut doc = format!("# Patents\n\n{header}\n");
        if let Some(abstract_text) = &self.abstract_text {
            doc.push_str(abstract_text);
            doc.push('\n');
        }
        doc
    }
}

#[derive(Debug, Clone)]
pub struct PatentFetcher {
    client: Client,
}

impl PatentFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }

    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> Result<PatentPage> {
        let parsed = parse_url(url)?;
        let page = fetch_page(&self.client, &parsed).await?;
        let patent = parse_patent(url, page.final_url.path(), &page.body)?;
        info!(title = %patent.title, number = ?patent.number, "fetched patent page");
        Ok(patent)
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

fn meta_content(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
}

pub(crate) fn parse_patent(url: &str, path: &str, html: &str) -> Result<PatentPage> {
    static OG_TITLE: LazyLock<Selector> =
        LazyLock::new(|| selector(r#"meta[property="og:title"]"#));
    static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
    static ABSTRACT: LazyLock<Selector> =
        LazyLock::new(|| selector("div.abstract, section[itemprop=\"abstract\"]"));
    static DESCRIPTION: LazyLock<Selector> =
        LazyLock::new(|| selector(r#"meta[name="description"]"#));
    static TIME: LazyLock<Selector> = LazyLock::new(|| selector("time"));

    let doc = Html::parse_document(html);

    let title = meta_content(&doc, &OG_TITLE)
        .or_else(|| {
            doc.select(&TITLE)
                .next()
                .map(element_text)
                .filter(|s| !s.is_empty())
        })
        .map(|t| {
            let t = TITLE_SUFFIX_RE.replace(&t, "");
            TITLE_PREFIX_RE.replace(t.trim(), "").trim().to_string()
        })
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CareerKbError::parse(format!("no patent title found at {url}")))?;

    let abstract_text = doc
        .select(&ABSTRACT)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty())
        .or_else(|| meta_content(&doc, &DESCRIPTION));

    let number = NUMBER_RE
        .find(path)
        .map(|m| m.as_str().replace(',', ""));

    let date = doc.select(&TIME).find_map(|el| {
        let raw = el
            .value()
            .attr("datetime")
            .map(str::to_string)
            .unwrap_or_else(|| element_text(el));
        DATE_RE.captures(&raw).map(|caps| match caps.get(2) {
            Some(month) => format!("{}-{}", &caps[1], month.as_str()),
            None => caps[1].to_string(),
        })
    });

    Ok(PatentPage {
        url: url.to_string(),
        title,
        abstract_text,
        number,
        date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use careerkb_shared::ScrapeFailure;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PATENT_HTML: &str = r#"<html><head>
<title>US10123456B2 - Method for caching things - Google Patents</title>
<meta property="og:title" content="US10123456B2 - Method for caching things - Google Patents">
<meta name="description" content="Short description.">
</head><body>
<section><div class="abstract">A cache that   remembers things.</div></section>
<time datetime="2019-11-12">2019-11-12</time>
</body></html>"#;

    #[tokio::test]
    async fn fetches_patent_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/patent/US10123456B2/en"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PATENT_HTML))
            .mount(&server)
            .await;

        let fetcher = PatentFetcher::new(&HttpConfig::default()).unwrap();
        let url = format!("{}/patent/US10123456B2/en", server.uri());
        let patent = fetcher.fetch(&url).await.unwrap();

        assert_eq!(patent.title, "Method for caching things");
        assert_eq!(patent.abstract_text.as_deref(), Some("A cache that remembers things."));
        assert_eq!(patent.number.as_deref(), Some("US10123456B2"));
        assert_eq!(patent.date.as_deref(), Some("2019-11"));

        let doc = patent.to_document_text();
        assert!(doc.starts_with("# Patents\n\n"));
        assert!(doc.contains("(US10123456B2), 2019-11"));
    }

    #[tokio::test]
    async fn missing_page_is_network_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = PatentFetcher::new(&HttpConfig::default()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/patent/US1A/en", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CareerKbError::Scrape {
                kind: ScrapeFailure::Network,
                ..
            }
        ));
    }

    #[test]
    fn untitled_page_is_a_parse_error() {
        let err = parse_patent("https://x.test/p", "/p", "<html><body><p>hi</p></body></html>")
            .unwrap_err();
        assert!(matches!(err, CareerKbError::Parse { .. }));
    }

    #[test]
    fn falls_back_to_title_and_description() {
        let html = r#"<html><head><title>Widget assembly</title>
<meta name="description" content="An assembly of widgets."></head>
<body><time>2021</time></body></html>"#;
        let patent = parse_patent("https://x.test/p", "/patent/US9,876,543B1", html).unwrap();
        assert_eq!(patent.title, "Widget assembly");
        assert_eq!(patent.abstract_text.as_deref(), Some("An assembly of widgets."));
        assert_eq!(patent.number.as_deref(), Some("US9876543B1"));
        assert_eq!(patent.date.as_deref(), Some("2021"));
    }
}
