//! Public profile scraping (best effort).
//!
//! Profile pages are frequently behind a login wall; that case and pages
//! without any usable public fields are reported as
//! [`ScrapeFailure::PrivateProfile`].

use async_trait::async_trait;
use careerkb_shared::{CareerKbError, HttpConfig, Result, ScrapeFailure};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Serialize;
use std::sync::LazyLock;
use tracing::{info, instrument};

use crate::http::{build_client, element_text, fetch_page, parse_url};

/// Pages shorter than this that show both login prompts are treated as a
/// login wall.
const LOGIN_GATE_MAX_CHARS: usize = 500;

/// Fields recovered from a public profile page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileFields {
    pub url: String,
    pub name: Option<String>,
    pub headline: Option<String>,
    pub about: Option<String>,
}

impl ProfileFields {
    /// Render as a sectioned document so the fields go through the same
    /// sanitize and normalize path as uploaded files. The name is passed
    /// separately as a hint.
    pub fn to_document_text(&self) -> String {
        let mut doc = String::new();
        if let Some(about) = &self.about {
            doc.push_str("# Summary\n");
            doc.push_str(about);
            doc.push_str("\n\n");
        }
        if let Some(headline) = &self.headline {
            doc.push_str("# Experience\n");
            doc.push_str(headline);
            doc.push('\n');
        }
        doc
    }
}

/// Fetches public profile fields for a URL.
#[async_trait]
pub trait ProfileScraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<ProfileFields>;
}

/// [`ProfileScraper`] over plain HTTP and HTML parsing.
#[derive(Debug, Clone)]
pub struct HttpProfileScraper {
    client: Client,
}

impl HttpProfileScraper {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl ProfileScraper for HttpProfileScraper {
    #[instrument(skip_all, fields(url = %url))]
    async fn scrape(&self, url: &str) -> Result<ProfileFields> {
        let parsed = parse_url(url)?;
        let page = fetch_page(&self.client, &parsed).await?;

        let path = page.final_url.path().to_ascii_lowercase();
        if path.contains("authwall") || path.contains("login") || path.contains("signup") {
            return Err(CareerKbError::scrape(
                url,
                ScrapeFailure::PrivateProfile,
                format!("redirected to {}", page.final_url),
            ));
        }

        let fields = parse_profile(url, &page.body)?;
        info!(
            has_name = fields.name.is_some(),
            has_headline = fields.headline.is_some(),
            has_about = fields.about.is_some(),
            "scraped profile"
        );
        Ok(fields)
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// Extract profile fields from page HTML.
pub(crate) fn parse_profile(url: &str, html: &str) -> Result<ProfileFields> {
    static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));
    static NAME: LazyLock<Selector> = LazyLock::new(|| selector("h1, h2"));
    static HEADLINE: LazyLock<Selector> =
        LazyLock::new(|| selector(r#"[class*="headline"], [class*="top-card-layout__headline"]"#));
    static ABOUT: LazyLock<Selector> = LazyLock::new(|| {
        selector(r#"section[id*="about"], section[class*="summary"], [class*="about"]"#)
    });
    static OG_DESCRIPTION: LazyLock<Selector> =
        LazyLock::new(|| selector(r#"meta[property="og:description"]"#));

    let doc = Html::parse_document(html);

    let visible = doc
        .select(&BODY)
        .next()
        .map(element_text)
        .unwrap_or_default();
    if visible.contains("Sign in")
        && visible.contains("Join now")
        && visible.chars().count() < LOGIN_GATE_MAX_CHARS
    {
        return Err(CareerKbError::scrape(
            url,
            ScrapeFailure::PrivateProfile,
            "profile is behind a login wall",
        ));
    }

    let non_empty = |s: String| (!s.is_empty()).then_some(s);
    let name = doc.select(&NAME).next().map(element_text).and_then(non_empty);
    let headline = doc
        .select(&HEADLINE)
        .next()
        .map(element_text)
        .and_then(non_empty);
    let about = doc
        .select(&ABOUT)
        .next()
        .map(element_text)
        .map(|text| {
            text.strip_prefix("About")
                .map(str::trim_start)
                .unwrap_or(&text)
                .to_string()
        })
        .and_then(non_empty)
        .or_else(|| {
            doc.select(&OG_DESCRIPTION)
                .next()
                .and_then(|m| m.value().attr("content"))
                .map(|s| s.trim().to_string())
                .and_then(non_empty)
        });

    if headline.is_none() && about.is_none() {
        return Err(CareerKbError::scrape(
            url,
            ScrapeFailure::PrivateProfile,
            "no usable public profile data",
        ));
    }

    Ok(ProfileFields {
        url: url.to_string(),
        name,
        headline,
        about,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PUBLIC_PROFILE: &str = r#"<html><head>
<meta property="og:description" content="Fallback description">
</head><body>
<h1> Jane   Doe </h1>
<div class="top-card-layout__headline">Staff Engineer at Acme</div>
<section id="about-section"><h2>About</h2><p>I build storage systems.</p></section>
</body></html>"#;

    fn kind(err: CareerKbError) -> ScrapeFailure {
        match err {
            CareerKbError::Scrape { kind, .. } => kind,
            other => panic!("expected scrape error, got {other}"),
        }
    }

    async fn scraper_for(server: &MockServer) -> (HttpProfileScraper, String) {
        let scraper = HttpProfileScraper::new(&HttpConfig::default()).unwrap();
        (scraper, format!("{}/in/jane", server.uri()))
    }

    #[tokio::test]
    async fn scrapes_public_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/in/jane"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PUBLIC_PROFILE))
            .mount(&server)
            .await;

        let (scraper, url) = scraper_for(&server).await;
        let fields = scraper.scrape(&url).await.unwrap();
        assert_eq!(fields.name.as_deref(), Some("Jane Doe"));
        assert_eq!(fields.headline.as_deref(), Some("Staff Engineer at Acme"));
        assert_eq!(fields.about.as_deref(), Some("I build storage systems."));

        let doc = fields.to_document_text();
        assert!(doc.contains("# Summary\nI build storage systems."));
        assert!(doc.contains("# Experience\nStaff Engineer at Acme"));
        assert!(!doc.contains("Jane Doe"));
    }

    #[tokio::test]
    async fn login_wall_is_private() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/in/jane"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body><a>Sign in</a> or <a>Join now</a> to view</body></html>",
            ))
            .mount(&server)
            .await;

        let (scraper, url) = scraper_for(&server).await;
        assert_eq!(kind(scraper.scrape(&url).await.unwrap_err()), ScrapeFailure::PrivateProfile);
    }

    #[tokio::test]
    async fn gated_status_is_private() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(999))
            .mount(&server)
            .await;

        let (scraper, url) = scraper_for(&server).await;
        assert_eq!(kind(scraper.scrape(&url).await.unwrap_err()), ScrapeFailure::PrivateProfile);
    }

    #[tokio::test]
    async fn server_errors_are_network_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (scraper, url) = scraper_for(&server).await;
        assert_eq!(kind(scraper.scrape(&url).await.unwrap_err()), ScrapeFailure::Network);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_without_request() {
        let scraper = HttpProfileScraper::new(&HttpConfig::default()).unwrap();
        assert_eq!(
            kind(scraper.scrape("linkedin.com/in/jane").await.unwrap_err()),
            ScrapeFailure::InvalidUrl
        );
    }

    #[test]
    fn empty_page_has_no_usable_data() {
        let err = parse_profile("https://x.test/in/a", "<html><body><h1>Jane</h1></body></html>")
            .unwrap_err();
        assert_eq!(kind(err), ScrapeFailure::PrivateProfile);
    }

    #[test]
    fn og_description_is_the_about_fallback() {
        let html = r#"<html><head><meta property="og:description" content="Builder."></head>
<body><div class="headline">Engineer</div></body></html>"#;
        let fields = parse_profile("https://x.test/in/a", html).unwrap();
        assert_eq!(fields.about.as_deref(), Some("Builder."));
    }
}
