/// One URL and its path segments, padded to the table width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub link: String,
    pub subdirs: Vec<Option<String>>,
}

/// Fixed-width table of URLs split into `subdir1..subdirM` columns.
///
/// Built only through [`Decomposer::decompose`], so every row carries exactly
/// `depth` subdir cells.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecomposedTable {
    rows: Vec<Row>,
    depth: usize,
}

impl DecomposedTable {
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of subdir columns (`M`).
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `Links,subdir1,...,subdirM`
    pub fn header(&self) -> Vec<String> {
        std::iter::once("Links".to_string())
            .chain((1..=self.depth).map(|i| format!("subdir{}", i)))
            .collect()
    }
}

/// Splits URLs relative to one fixed site prefix.
///
/// Sitemaps on a different domain need their own `Decomposer`.
#[derive(Debug, Clone)]
pub struct Decomposer {
    prefix: String,
}

impl Decomposer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn segments(&self, url: &str) -> Vec<Option<String>> {
        segments(url, &self.prefix)
    }

    /// Two passes: collect every segment list and the max depth, then pad each row
    /// on the right to that depth.
    pub fn decompose<S: AsRef<str>>(&self, urls: &[S]) -> DecomposedTable {
        let split: Vec<(&str, Vec<Option<String>>)> = urls
            .iter()
            .map(|u| (u.as_ref(), self.segments(u.as_ref())))
            .collect();

        let depth = split.iter().map(|(_, s)| s.len()).max().unwrap_or(0);

        let rows = split
            .into_iter()
            .map(|(link, mut subdirs)| {
                subdirs.resize(depth, None);
                Row {
                    link: link.to_string(),
                    subdirs,
                }
            })
            .collect();

        DecomposedTable { rows, depth }
    }
}

/// Path segments of `url` below `prefix`, or `[None]` when the URL lies outside it.
///
/// `url == prefix` gives a single empty segment, never an empty list.
pub fn segments(url: &str, prefix: &str) -> Vec<Option<String>> {
    match url.strip_prefix(prefix) {
        Some(rest) => rest
            .trim_matches('/')
            .split('/')
            .map(|s| Some(s.to_string()))
            .collect(),
        None => vec![None],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "https://example.com/";

    fn some(parts: &[&str]) -> Vec<Option<String>> {
        parts.iter().map(|p| Some(p.to_string())).collect()
    }

    #[test]
    fn splits_below_prefix() {
        assert_eq!(
            segments("https://example.com/blog/2024/post", PREFIX),
            some(&["blog", "2024", "post"])
        );
    }

    #[test]
    fn trims_trailing_slash() {
        assert_eq!(
            segments("https://example.com/courses/", PREFIX),
            some(&["courses"])
        );
    }

    #[test]
    fn prefix_itself_is_one_empty_segment() {
        assert_eq!(segments(PREFIX, PREFIX), some(&[""]));
    }

    #[test]
    fn foreign_url_is_null_sentinel() {
        assert_eq!(segments("https://other.org/blog", PREFIX), vec![None]);
        assert_eq!(segments("http://example.com/blog", PREFIX), vec![None]);
    }

    #[test]
    fn segments_match_plain_split() {
        let urls = [
            "https://example.com/a",
            "https://example.com/a/b/c/d",
            "https://example.com/tutorial/python-lists",
        ];
        for u in urls {
            let expected: Vec<Option<String>> = u[PREFIX.len()..]
                .split('/')
                .map(|s| Some(s.to_string()))
                .collect();
            assert_eq!(segments(u, PREFIX), expected, "{}", u);
        }
    }

    #[test]
    fn rows_padded_to_max_depth() {
        let d = Decomposer::new(PREFIX);
        let table = d.decompose(&[
            "https://example.com/blog/2024/post",
            "https://example.com/about",
            "https://example.com/docs/a/b/c",
            "https://elsewhere.net/x",
        ]);

        assert_eq!(table.depth(), 4);
        assert_eq!(table.len(), 4);
        for row in table.rows() {
            assert_eq!(row.subdirs.len(), 4, "{}", row.link);
        }

        let post = &table.rows()[0];
        assert_eq!(post.link, "https://example.com/blog/2024/post");
        assert_eq!(&post.subdirs[..3], &some(&["blog", "2024", "post"])[..]);
        assert_eq!(post.subdirs[3], None);

        let about = &table.rows()[1];
        assert_eq!(about.subdirs, vec![Some("about".to_string()), None, None, None]);

        let foreign = &table.rows()[3];
        assert!(foreign.subdirs.iter().all(Option::is_none));
    }

    #[test]
    fn header_follows_depth() {
        let d = Decomposer::new(PREFIX);
        let table = d.decompose(&["https://example.com/a/b"]);
        assert_eq!(table.header(), vec!["Links", "subdir1", "subdir2"]);
    }

    #[test]
    fn empty_input_has_links_column_only() {
        let d = Decomposer::new(PREFIX);
        let table = d.decompose::<&str>(&[]);
        assert_eq!(table.len(), 0);
        assert_eq!(table.depth(), 0);
        assert_eq!(table.header(), vec!["Links"]);
    }

    #[test]
    fn decomposition_is_idempotent() {
        let d = Decomposer::new(PREFIX);
        let urls = vec![
            "https://example.com/x/y".to_string(),
            "https://example.com/z".to_string(),
            "ftp://nope".to_string(),
        ];
        assert_eq!(d.decompose(&urls), d.decompose(&urls));
    }

    #[test]
    fn row_order_follows_input() {
        let d = Decomposer::new(PREFIX);
        let urls = ["https://example.com/b", "https://example.com/a"];
        let links: Vec<_> = d.decompose(&urls).rows().iter().map(|r| r.link.clone()).collect();
        assert_eq!(links, urls);
    }
}
