//! Line-based `@name prompt` directive parsing.
//!
//! A directive line is one whose first non-whitespace character is `@`.
//! Within such a line every `@` opens a directive; the target name runs to
//! the first separator (ASCII or CJK punctuation, or whitespace). The prompt
//! is the rest of the segment, and the last directive of a line also absorbs
//! the following non-blank, non-directive lines.

/// Characters that terminate a target name.
const SEPARATORS: &[char] = &[
    ' ', '\t', '\n', ',', '.', '!', '?', '，', '。', '！', '？',
];

const PUNCTUATION: &[char] = &[',', '.', '!', '?', '，', '。', '！', '？'];

/// One parsed `@` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub target: String,
    pub prompt: String,
    /// True when the target name was explicitly closed by a punctuation
    /// separator. Such a directive is complete even with an empty prompt;
    /// a bare whitespace-separated mention needs prompt text to count.
    pub punctuated: bool,
}

/// Parses all directives out of a reply text. Duplicates are preserved;
/// targets are not filtered here (the mode decides what to skip).
pub fn parse_directives(text: &str) -> Vec<Directive> {
    let mut directives: Vec<Directive> = Vec::new();
    // Index into `directives` of the entry absorbing continuation lines.
    let mut open: Option<usize> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix('@') {
            parse_directive_line(rest, &mut directives);
            open = if directives.is_empty() {
                None
            } else {
                Some(directives.len() - 1)
            };
        } else if trimmed.is_empty() {
            continue;
        } else if let Some(idx) = open {
            let prompt = &mut directives[idx].prompt;
            if !prompt.is_empty() {
                prompt.push('\n');
            }
            prompt.push_str(trimmed);
        }
    }

    directives.retain(|d| !d.target.is_empty() && (d.punctuated || !d.prompt.is_empty()));
    directives
}

/// Parses one directive line. `rest` is the line content after its leading
/// `@`. A further `@` opens another directive only when it directly follows
/// a separator; an `@` embedded in a word (an email, a handle quoted in
/// prose) stays part of the prompt.
fn parse_directive_line(rest: &str, out: &mut Vec<Directive>) {
    let mut segments = Vec::new();
    let mut segment_start = 0;
    for (i, c) in rest.char_indices() {
        if c != '@' {
            continue;
        }
        let follows_separator = rest[..i]
            .chars()
            .next_back()
            .is_some_and(|prev| SEPARATORS.contains(&prev));
        if follows_separator {
            segments.push(&rest[segment_start..i]);
            segment_start = i + 1;
        }
    }
    segments.push(&rest[segment_start..]);

    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        let (target, tail) = match segment.find(SEPARATORS) {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };

        let mut chars = tail.chars();
        let punctuated = matches!(chars.next(), Some(c) if PUNCTUATION.contains(&c));
        // Drop the single separator that closed the name, then trim.
        let prompt = chars.as_str().trim().to_string();

        out.push(Directive {
            target: target.trim().to_string(),
            prompt,
            punctuated,
        });
    }
}
