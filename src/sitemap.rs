use quick_xml::events::Event;
use tracing::{info, warn};
use url::Url;

use crate::fetch::HttpFetcher;

const SITEMAP_DIRECTIVE: &str = "Sitemap:";
const NESTED_EXTENSION: &str = ".xml";

/// Fetch `{base_url}/robots.txt` and return its declared sitemap URLs in file order.
///
/// A failed fetch means no roots, not an error.
pub async fn discover_roots(fetcher: &HttpFetcher, base_url: &str) -> Vec<String> {
    let robots_url = format!("{}/robots.txt", base_url.trim_end_matches('/'));
    info!("Fetching robots.txt: {}", robots_url);

    match fetcher.get_text(&robots_url).await {
        Ok(body) => {
            let roots = parse_robots(&body);
            info!("Sitemaps declared in robots.txt: {}", roots.len());
            roots
        }
        Err(e) => {
            warn!("No sitemaps discovered: {}", e);
            Vec::new()
        }
    }
}

/// Every `Sitemap:` line of a robots.txt body, with the URL after `": "`.
pub fn parse_robots(body: &str) -> Vec<String> {
    body.lines()
        .filter(|line| line.starts_with(SITEMAP_DIRECTIVE))
        .filter_map(|line| line.split_once(": "))
        .map(|(_, url)| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect()
}

/// `<loc>` values of a sitemap or sitemap-index document, in document order.
pub struct ParsedLocs {
    pub locs: Vec<String>,
    /// Set when the document stopped parsing early; `locs` holds what came before.
    pub error: Option<String>,
}

/// Collect the text of every `<loc>` element, whatever its parent or namespace
/// prefix.
pub fn parse_locs(xml: &str) -> ParsedLocs {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut locs = Vec::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"loc" => {
                current = Some(String::new());
            }
            Ok(Event::Text(e)) => {
                if let Some(buf) = current.as_mut() {
                    match e.unescape() {
                        Ok(text) => buf.push_str(&text),
                        Err(err) => return ParsedLocs { locs, error: Some(err.to_string()) },
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(buf) = current.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"loc" => {
                if let Some(text) = current.take() {
                    locs.push(text.trim().to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return ParsedLocs {
                    locs,
                    error: Some(e.to_string()),
                }
            }
            _ => {}
        }
    }

    ParsedLocs { locs, error: None }
}

/// Entries ending in `.xml` are sitemaps themselves and get walked.
pub fn is_nested_sitemap(link: &str) -> bool {
    link.ends_with(NESTED_EXTENSION)
}

/// Final path segment of a sitemap URL; its table's key.
pub fn identifier(sitemap_url: &str) -> String {
    sitemap_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Host plus full path, `/` replaced by `_`, for telling same-named sitemaps apart.
pub fn namespaced_identifier(sitemap_url: &str) -> String {
    match Url::parse(sitemap_url) {
        Ok(u) => {
            let host = u.host_str().unwrap_or_default();
            let path = u.path().trim_matches('/').replace('/', "_");
            if path.is_empty() {
                host.to_string()
            } else {
                format!("{}_{}", host, path)
            }
        }
        Err(_) => sitemap_url.replace(['/', ':'], "_"),
    }
}

/// Key for the visited set: the parsed URL without fragment.
pub fn canonical(sitemap_url: &str) -> String {
    match Url::parse(sitemap_url) {
        Ok(mut u) => {
            u.set_fragment(None);
            u.to_string()
        }
        Err(_) => sitemap_url.to_string(),
    }
}
