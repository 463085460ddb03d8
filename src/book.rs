use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::formats::Work;

/// `# title`, then `## chapter` followed by its text for every chapter.
pub fn render_text(work: &Work) -> String {
    let mut out = format!("# {}\n\n", work.title);
    for chapter in &work.chapters {
        out.push_str(&format!("## {}\n\n", chapter.title));
        let content = chapter.content.trim_end();
        if !content.is_empty() {
            out.push_str(content);
            out.push_str("\n\n");
        }
    }
    out
}

/// Replaces characters that are invalid in file names on common platforms.
pub fn sanitize_file_name(title: &str) -> String {
    let sanitized = title
        .trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>();
    let sanitized = sanitized.trim_matches('.').trim();
    if sanitized.is_empty() {
        "untitled".to_owned()
    } else {
        sanitized.to_owned()
    }
}

/// Writes the work into `dir` as `<title>.txt`, or `<title>_N.txt` when that
/// name is taken. Never overwrites. Returns the written path.
pub fn write_work(dir: &Path, work: &Work) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create output dir: {}", dir.display()))?;

    let stem = sanitize_file_name(&work.title);
    let text = render_text(work);
    let mut counter = 0usize;
    loop {
        let path = if counter == 0 {
            dir.join(format!("{stem}.txt"))
        } else {
            dir.join(format!("{stem}_{counter}.txt"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(text.as_bytes())
                    .with_context(|| format!("write book: {}", path.display()))?;
                file.flush()
                    .with_context(|| format!("flush book: {}", path.display()))?;
                tracing::info!(path = %path.display(), chapters = work.chapters.len(), "book written");
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => counter += 1,
            Err(err) => {
                return Err(err).with_context(|| format!("create book: {}", path.display()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::WorkType;
    use crate::formats::Chapter;

    fn work(title: &str) -> Work {
        Work {
            title: title.to_owned(),
            author: "demo".to_owned(),
            work_id: "1".to_owned(),
            detail_url: "https://books.example/book/1/".to_owned(),
            work_type: WorkType::IndexedMultiChapter,
            description: None,
            status: None,
            chapters: vec![
                Chapter {
                    sequence: 1,
                    title: "第一章".to_owned(),
                    content: "一\n二\n".to_owned(),
                    url: "https://books.example/book/1/1.html".to_owned(),
                },
                Chapter {
                    sequence: 2,
                    title: "第二章".to_owned(),
                    content: String::new(),
                    url: "https://books.example/book/1/2.html".to_owned(),
                },
            ],
        }
    }

    #[test]
    fn text_has_title_and_chapter_headings() {
        assert_eq!(
            render_text(&work("长夜")),
            "# 长夜\n\n## 第一章\n\n一\n二\n\n## 第二章\n\n"
        );
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("a/b: c?"), "a_b_ c_");
        assert_eq!(sanitize_file_name("  ..  "), "untitled");
    }

    #[test]
    fn existing_files_get_a_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_work(dir.path(), &work("长夜")).unwrap();
        let second = write_work(dir.path(), &work("长夜")).unwrap();
        let third = write_work(dir.path(), &work("长夜")).unwrap();
        assert_eq!(first.file_name().unwrap(), "长夜.txt");
        assert_eq!(second.file_name().unwrap(), "长夜_1.txt");
        assert_eq!(third.file_name().unwrap(), "长夜_2.txt");
        assert!(std::fs::read_to_string(first).unwrap().starts_with("# 长夜\n"));
    }
}
