//! Page chunking with neighbour overlap.

use super::ocr::OcrPage;

/// One chunk per page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageChunk {
    pub page: u32,
    pub content: String,
}

/// Build one chunk per page: a `# page: n` header, the last `overlap`
/// characters of the previous page, the page itself and the first `overlap`
/// characters of the next page. Overlap is counted in chars, not bytes.
pub fn split_pages(pages: &[OcrPage], overlap: usize) -> Vec<PageChunk> {
    pages
        .iter()
        .enumerate()
        .map(|(i, page)| {
            let prev = i
                .checked_sub(1)
                .map(|p| tail_chars(&pages[p].markdown, overlap))
                .unwrap_or_default();
            let next = pages
                .get(i + 1)
                .map(|n| head_chars(&n.markdown, overlap))
                .unwrap_or_default();

            PageChunk {
                page: page.page,
                content: format!(
                    "# page: {}\n{}\n{}\n{}\n",
                    page.page, prev, page.markdown, next
                ),
            }
        })
        .collect()
}

fn head_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn tail_chars(s: &str, n: usize) -> String {
    let len = s.chars().count();
    s.chars().skip(len.saturating_sub(n)).collect()
}
