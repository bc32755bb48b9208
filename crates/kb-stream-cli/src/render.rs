use std::io::Write as _;

use kb_stream::{Catalog, ProductDetail, Section};

/// Tracks how much of a growing text has been written so only the new tail
/// is printed on each update.
#[derive(Default)]
pub struct Tail {
    printed: usize,
}

impl Tail {
    /// Returns the unprinted suffix of `text`. A shorter text than before means
    /// the stream reset; the whole text is returned again after a line break.
    pub fn advance<'a>(&mut self, text: &'a str) -> (bool, &'a str) {
        let restarted = text.len() < self.printed;
        if restarted {
            self.printed = 0;
        }
        let suffix = text.get(self.printed..).unwrap_or_default();
        self.printed = text.len();
        (restarted, suffix)
    }

    pub fn write(&mut self, text: &str) {
        let (restarted, suffix) = self.advance(text);
        let mut out = std::io::stdout().lock();
        if restarted {
            let _ = writeln!(out);
        }
        let _ = write!(out, "{suffix}");
        let _ = out.flush();
    }
}

pub fn product(name: &str, detail: &ProductDetail) {
    println!("# {name}");
    for section in Section::ALL {
        let text = detail.section(section);
        if !text.is_empty() {
            println!("\n## {}\n{}", section.as_str(), text);
        }
    }
    if !detail.sources.is_empty() {
        println!("\nSources:");
        for source in &detail.sources {
            println!("- {source}");
        }
    }
}

pub fn catalog(catalog: &Catalog) {
    for (index, entry) in catalog.entries.iter().enumerate() {
        println!("{:>3}. {} [{}]", index + 1, entry.name, entry.icon);
        println!("     {}", entry.description);
        if !entry.link.is_empty() && entry.link != "#" {
            println!("     {}", entry.link);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_returns_only_new_text() {
        let mut tail = Tail::default();
        assert_eq!(tail.advance("Hel"), (false, "Hel"));
        assert_eq!(tail.advance("Hello"), (false, "lo"));
        assert_eq!(tail.advance("Hello"), (false, ""));
    }

    #[test]
    fn tail_restarts_when_text_shrinks() {
        let mut tail = Tail::default();
        tail.advance("stale text");
        assert_eq!(tail.advance("new"), (true, "new"));
    }
}
