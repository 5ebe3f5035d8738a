//! Markdown document chunking (Processor pipeline phase 4).
//!
//! Splits by level-2 headings; oversized sections are split by paragraph,
//! never across a fenced code block; oversized paragraphs are split by
//! sentence, flagging both conditions so downstream consumers can tell a
//! chunk was forced smaller than the natural paragraph boundary.
//!
//! Token estimation throughout this crate is the same rough heuristic
//! used by the pipeline that chunking feeds: 1 token ~= 4 characters.

use once_cell::sync::Lazy;
use regex::Regex;

static HEADING2: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^##\s+(.*)$").unwrap());
static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^```").unwrap());

/// `1 token ~= 4 characters`, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// One candidate document chunk before it is wrapped into a `Chunk` with
/// an id and an embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct DocChunkCandidate {
    pub section_index: usize,
    pub chunk_index: usize,
    pub title: String,
    pub text: String,
    pub start_line: i64,
    pub end_line: i64,
    pub is_large_paragraph: bool,
    pub is_split_paragraph: bool,
}

struct Section<'a> {
    index: usize,
    heading: String,
    lines: Vec<(usize, &'a str)>,
}

struct Paragraph {
    start_line: usize,
    end_line: usize,
    text: String,
    is_code_block: bool,
}

fn split_into_sections(content: &str) -> Vec<Section<'_>> {
    let lines: Vec<&str> = content.lines().collect();
    let mut heading_positions: Vec<(usize, String)> = Vec::new();
    for cap in HEADING2.captures_iter(content) {
        let heading_text = cap.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        let match_start = cap.get(0).unwrap().start();
        let line_no = content[..match_start].matches('\n').count();
        heading_positions.push((line_no, heading_text));
    }

    let mut sections = Vec::new();
    if heading_positions.is_empty() {
        if lines.is_empty() {
            return sections;
        }
        sections.push(Section {
            index: 0,
            heading: String::new(),
            lines: lines.iter().enumerate().map(|(i, l)| (i, *l)).collect(),
        });
        return sections;
    }

    if heading_positions[0].0 > 0 {
        let pre_lines: Vec<(usize, &str)> = lines[..heading_positions[0].0]
            .iter()
            .enumerate()
            .map(|(i, l)| (i, *l))
            .collect();
        if pre_lines.iter().any(|(_, l)| !l.trim().is_empty()) {
            sections.push(Section {
                index: 0,
                heading: String::new(),
                lines: pre_lines,
            });
        }
    }

    for (idx, (line_no, heading)) in heading_positions.iter().enumerate() {
        let end = heading_positions.get(idx + 1).map(|(n, _)| *n).unwrap_or(lines.len());
        let section_lines: Vec<(usize, &str)> = lines[*line_no..end]
            .iter()
            .enumerate()
            .map(|(i, l)| (line_no + i, *l))
            .collect();
        sections.push(Section {
            index: sections.len(),
            heading: heading.clone(),
            lines: section_lines,
        });
    }
    sections
}

fn split_into_paragraphs(lines: &[(usize, &str)]) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<(usize, &str)> = Vec::new();
    let mut in_fence = false;

    fn flush(current: &mut Vec<(usize, &str)>, paragraphs: &mut Vec<Paragraph>, is_code_block: bool) {
        if current.is_empty() {
            return;
        }
        let start_line = current.first().unwrap().0;
        let end_line = current.last().unwrap().0;
        let text = current.iter().map(|(_, l)| *l).collect::<Vec<_>>().join("\n");
        paragraphs.push(Paragraph {
            start_line,
            end_line,
            text,
            is_code_block,
        });
        current.clear();
    }

    for (line_no, line) in lines {
        let is_fence_line = FENCE.is_match(line);
        if is_fence_line && !in_fence {
            flush(&mut current, &mut paragraphs, false);
            in_fence = true;
            current.push((*line_no, line));
            continue;
        }
        if is_fence_line && in_fence {
            current.push((*line_no, line));
            flush(&mut current, &mut paragraphs, true);
            in_fence = false;
            continue;
        }
        if in_fence {
            current.push((*line_no, line));
            continue;
        }
        if line.trim().is_empty() {
            flush(&mut current, &mut paragraphs, false);
        } else {
            current.push((*line_no, line));
        }
    }
    flush(&mut current, &mut paragraphs, in_fence);
    paragraphs
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let after = &text[i + c.len_utf8()..];
            let boundary = after.chars().next().map(|n| n.is_whitespace()).unwrap_or(true);
            if boundary {
                let end = i + c.len_utf8();
                let s = text[start..end].trim();
                if !s.is_empty() {
                    sentences.push(s.to_string());
                }
                start = end;
            }
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    if sentences.is_empty() && !text.trim().is_empty() {
        sentences.push(text.trim().to_string());
    }
    sentences
}

fn tail_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.len() <= max_chars {
        return String::new();
    }
    let mut start = text.len() - max_chars;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// Chunk one markdown document into retrievable sections.
pub fn chunk_markdown(content: &str, chunk_size_tokens: u32, overlap_tokens: u32) -> Vec<DocChunkCandidate> {
    if content.trim().is_empty() {
        return Vec::new();
    }
    let budget = chunk_size_tokens as usize;
    let overlap_chars = overlap_tokens as usize * 4;

    let mut out = Vec::new();
    for section in split_into_sections(content) {
        let section_text = section.lines.iter().map(|(_, l)| *l).collect::<Vec<_>>().join("\n");
        if section_text.trim().is_empty() {
            continue;
        }
        let title = if section.heading.is_empty() {
            "Introduction".to_string()
        } else {
            section.heading.clone()
        };

        if estimate_tokens(&section_text) <= budget {
            out.push(DocChunkCandidate {
                section_index: section.index,
                chunk_index: 0,
                title,
                text: section_text,
                start_line: section.lines.first().map(|(n, _)| *n as i64 + 1).unwrap_or(1),
                end_line: section.lines.last().map(|(n, _)| *n as i64 + 1).unwrap_or(1),
                is_large_paragraph: false,
                is_split_paragraph: false,
            });
            continue;
        }

        let paragraphs = split_into_paragraphs(&section.lines);
        let mut chunk_index = 0usize;
        let mut acc: Vec<&Paragraph> = Vec::new();
        let mut acc_tokens = 0usize;
        let mut prev_tail = String::new();

        for para in &paragraphs {
            let para_tokens = estimate_tokens(&para.text);
            if para_tokens > budget {
                flush_chunk(
                    &mut acc,
                    &mut chunk_index,
                    &mut prev_tail,
                    &title,
                    section.index,
                    overlap_chars,
                    &mut out,
                );
                acc_tokens = 0;

                if para.is_code_block {
                    out.push(DocChunkCandidate {
                        section_index: section.index,
                        chunk_index,
                        title: title.clone(),
                        text: para.text.clone(),
                        start_line: para.start_line as i64 + 1,
                        end_line: para.end_line as i64 + 1,
                        is_large_paragraph: true,
                        is_split_paragraph: false,
                    });
                    chunk_index += 1;
                } else {
                    let sentences = split_sentences(&para.text);
                    let mut sent_acc: Vec<&str> = Vec::new();
                    let mut sent_tokens = 0usize;
                    for sentence in &sentences {
                        let s_tokens = estimate_tokens(sentence);
                        if sent_tokens + s_tokens > budget && !sent_acc.is_empty() {
                            out.push(DocChunkCandidate {
                                section_index: section.index,
                                chunk_index,
                                title: title.clone(),
                                text: sent_acc.join(" "),
                                start_line: para.start_line as i64 + 1,
                                end_line: para.end_line as i64 + 1,
                                is_large_paragraph: true,
                                is_split_paragraph: true,
                            });
                            chunk_index += 1;
                            sent_acc.clear();
                            sent_tokens = 0;
                        }
                        sent_acc.push(sentence);
                        sent_tokens += s_tokens;
                    }
                    if !sent_acc.is_empty() {
                        out.push(DocChunkCandidate {
                            section_index: section.index,
                            chunk_index,
                            title: title.clone(),
                            text: sent_acc.join(" "),
                            start_line: para.start_line as i64 + 1,
                            end_line: para.end_line as i64 + 1,
                            is_large_paragraph: true,
                            is_split_paragraph: true,
                        });
                        chunk_index += 1;
                    }
                }
                continue;
            }

            if acc_tokens + para_tokens > budget && !acc.is_empty() {
                flush_chunk(
                    &mut acc,
                    &mut chunk_index,
                    &mut prev_tail,
                    &title,
                    section.index,
                    overlap_chars,
                    &mut out,
                );
                acc_tokens = 0;
            }
            acc.push(para);
            acc_tokens += para_tokens;
        }
        flush_chunk(
            &mut acc,
            &mut chunk_index,
            &mut prev_tail,
            &title,
            section.index,
            overlap_chars,
            &mut out,
        );
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn flush_chunk(
    acc: &mut Vec<&Paragraph>,
    chunk_index: &mut usize,
    prev_tail: &mut String,
    title: &str,
    section_index: usize,
    overlap_chars: usize,
    out: &mut Vec<DocChunkCandidate>,
) {
    if acc.is_empty() {
        return;
    }
    let start_line = acc.first().unwrap().start_line as i64 + 1;
    let end_line = acc.last().unwrap().end_line as i64 + 1;
    let mut text = acc.iter().map(|p| p.text.clone()).collect::<Vec<_>>().join("\n\n");
    if *chunk_index > 0 && !prev_tail.is_empty() {
        text = format!("{prev_tail}\n\n{text}");
    }
    *prev_tail = tail_chars(&text, overlap_chars);
    out.push(DocChunkCandidate {
        section_index,
        chunk_index: *chunk_index,
        title: title.to_string(),
        text,
        start_line,
        end_line,
        is_large_paragraph: false,
        is_split_paragraph: false,
    });
    *chunk_index += 1;
    acc.clear();
}
