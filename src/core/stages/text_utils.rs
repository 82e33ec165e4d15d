// Markdown helpers for the text stage.

use pulldown_cmark::{Event, Options, Parser, TagEnd};

/// Strip markdown markup and keep only the text a reader would see.
///
/// Block ends and line breaks become newlines. HTML tags are dropped but the
/// text between them is kept.
pub fn markdown_to_plain_text(markdown: &str) -> String {
    let options =
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(markdown, options);
    let mut output = String::with_capacity(markdown.len());
    // A tag can be split across several HTML events.
    let mut in_tag = false;

    for event in parser {
        match event {
            Event::Text(text) | Event::Code(text) => output.push_str(&text),
            Event::Html(html) | Event::InlineHtml(html) => {
                push_html_text(&html, &mut in_tag, &mut output)
            }
            Event::SoftBreak | Event::HardBreak => output.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::HtmlBlock,
            ) => {
                if !output.ends_with('\n') {
                    output.push('\n');
                }
            }
            _ => {}
        }
    }

    output.trim().to_owned()
}

fn push_html_text(html: &str, in_tag: &mut bool, output: &mut String) {
    for ch in html.chars() {
        match ch {
            '<' => *in_tag = true,
            '>' if *in_tag => *in_tag = false,
            _ if !*in_tag => output.push(ch),
            _ => {}
        }
    }
}
