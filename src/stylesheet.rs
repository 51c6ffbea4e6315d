//! A small `nom`-based CSS parser.
//!
//! Only the structure needed to inspect resource references is modelled:
//! rules keep their raw prelude, declarations are `(property, value)` pairs,
//! and grouping at-rules such as `@media` carry their nested rules.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1, take_while_m_n},
    character::complete::{anychar, char, multispace1, satisfy},
    combinator::{cut, map, opt, recognize, value},
    error::{ErrorKind, ParseError},
    multi::{many0, many0_count, many1_count},
    sequence::{delimited, preceded, terminated},
};
use thiserror::Error;

/// At-rules whose block holds rules rather than declarations.
const NESTING_AT_RULES: &[&str] = &[
    "media",
    "supports",
    "document",
    "-moz-document",
    "layer",
    "container",
    "scope",
    "starting-style",
    "keyframes",
    "-webkit-keyframes",
    "-moz-keyframes",
];

/// Functions whose string arguments are image URLs.
const IMAGE_FUNCTIONS: &[&str] = &[
    "image-set",
    "-webkit-image-set",
    "image",
    "cross-fade",
    "-webkit-cross-fade",
];

/// A parsed stylesheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stylesheet {
    pub rules: Vec<Rule>,
}

impl Stylesheet {
    /// Every rule in document order, nested rules following their parent.
    pub fn flatten(&self) -> Vec<&Rule> {
        fn walk<'a>(rules: &'a [Rule], out: &mut Vec<&'a Rule>) {
            for rule in rules {
                out.push(rule);
                walk(&rule.rules, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.rules, &mut out);
        out
    }
}

/// A style rule or at-rule.
///
/// For style rules `prelude` is the selector list; for at-rules it starts
/// with `@name`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rule {
    pub prelude: String,
    pub declarations: Vec<Declaration>,
    pub rules: Vec<Rule>,
}

impl Rule {
    /// The at-keyword of an at-rule, without the `@`.
    pub fn at_keyword(&self) -> Option<&str> {
        let rest = self.prelude.strip_prefix('@')?;
        let end = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
        Some(&rest[..end])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
}

/// Stylesheet syntax error with a 1-based position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{line}:{column}: {message}")]
pub struct StylesheetError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl StylesheetError {
    fn at(source: &str, rest: &str, message: &str) -> Self {
        let consumed = &source[..source.len().saturating_sub(rest.len())];
        let line = consumed.matches('\n').count() + 1;
        let column = consumed.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        Self {
            line,
            column,
            message: message.to_string(),
        }
    }
}

/// Parse CSS text into rules and declarations.
pub fn parse_stylesheet(css: &str) -> Result<Stylesheet, StylesheetError> {
    match rule_list(css, false) {
        Ok((_, rules)) => Ok(Stylesheet { rules }),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(StylesheetError::at(css, e.input, e.message))
        }
        Err(nom::Err::Incomplete(_)) => Err(StylesheetError::at(css, "", "unexpected end of input")),
    }
}

/// Every URL a declaration value may make the browser fetch.
///
/// The value is tokenized, so function names are compared after unescaping
/// (`u\72l(` is `url(`). Reported are the argument of each `url()` (quoted or
/// unquoted, CSS escapes decoded), every string inside an image function such
/// as `image-set()`, and any other string or bare token that reads as an
/// absolute URL. A malformed `url(` or an unterminated string still yields its
/// raw text so callers never skip it.
pub fn extract_urls(value: &str) -> Vec<String> {
    let mut urls = Vec::new();
    // one entry per open parenthesis: whether it is inside an image function
    let mut nesting: Vec<bool> = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let in_image = nesting.last().copied().unwrap_or(false);
        let (after, token) = match value_token(rest) {
            Ok(ok) => ok,
            Err(_) => {
                let text = unescape(rest.trim_start_matches(['"', '\'']).trim());
                if in_image || looks_like_url(&text) {
                    urls.push(text);
                }
                break;
            }
        };
        match token {
            Token::Url(url) => urls.push(url),
            Token::Function(name) => {
                let image = IMAGE_FUNCTIONS.iter().any(|f| name.eq_ignore_ascii_case(f));
                nesting.push(in_image || image);
            }
            Token::Open => nesting.push(in_image),
            Token::Close => {
                nesting.pop();
            }
            Token::Str(text) if in_image || looks_like_url(&text) => urls.push(text),
            Token::Word(text) if looks_like_url(&text) => urls.push(text),
            Token::Str(_) | Token::Word(_) | Token::Skip => {}
        }
        rest = after;
    }
    urls
}

/// The URL fetched by an `@import` prelude, in either `url()` or string form.
pub fn import_target(prelude: &str) -> Option<String> {
    let rest = prelude.strip_prefix('@')?;
    if !rest.get(..6).is_some_and(|k| k.eq_ignore_ascii_case("import")) {
        return None;
    }
    let args = rest[6..].trim_start();
    if let Some(url) = extract_urls(args).into_iter().next() {
        return Some(url);
    }
    string_token(args).ok().map(|(_, s)| unquote(s))
}

// --- Error plumbing ---

#[derive(Debug, Clone, PartialEq)]
struct CssError<'a> {
    input: &'a str,
    message: &'static str,
}

impl<'a> ParseError<&'a str> for CssError<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        CssError {
            input,
            message: "unexpected token",
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type PResult<'a, O> = IResult<&'a str, O, CssError<'a>>;

/// Replace the message of any error produced by `parser`.
fn expect<'a, O, P>(message: &'static str, mut parser: P) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    P: Parser<&'a str, Output = O, Error = CssError<'a>>,
{
    move |input| {
        parser
            .parse(input)
            .map_err(|err| err.map(|e| CssError { message, ..e }))
    }
}

fn failure<'a, O>(input: &'a str, message: &'static str) -> PResult<'a, O> {
    Err(nom::Err::Failure(CssError { input, message }))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}

// --- Tokens ---

fn comment(input: &str) -> PResult<'_, &str> {
    preceded(
        tag("/*"),
        cut(expect("unclosed comment", terminated(take_until("*/"), tag("*/")))),
    )
    .parse(input)
}

fn elided_comment(input: &str) -> PResult<'_, &str> {
    map(comment, |_| "").parse(input)
}

/// Whitespace and comments.
fn sp(input: &str) -> PResult<'_, ()> {
    value(
        (),
        many0_count(alt((value((), multispace1), value((), comment)))),
    )
    .parse(input)
}

fn quoted<const Q: char>(input: &str) -> PResult<'_, &str> {
    recognize((
        char(Q),
        cut(expect(
            "unclosed string",
            (
                many0_count(alt((
                    recognize(preceded(char('\\'), anychar)),
                    take_while1(|c: char| c != Q && c != '\\' && c != '\n'),
                ))),
                char(Q),
            ),
        )),
    ))
    .parse(input)
}

fn string_token(input: &str) -> PResult<'_, &str> {
    alt((quoted::<'"'>, quoted::<'\''>)).parse(input)
}

/// A balanced `( ... )` group, kept verbatim.
fn paren_block(input: &str) -> PResult<'_, &str> {
    recognize((
        char('('),
        cut(expect(
            "missing ')'",
            (
                many0_count(alt((
                    recognize(comment),
                    string_token,
                    paren_block,
                    take_while1(|c: char| !matches!(c, '(' | ')' | '"' | '\'' | '/')),
                    tag("/"),
                ))),
                char(')'),
            ),
        )),
    ))
    .parse(input)
}

/// Component values up to (not including) one of `stops`, comments removed.
fn text_until<'a>(input: &'a str, stops: &[char]) -> PResult<'a, String> {
    let run = take_while1(|c: char| !stops.contains(&c) && !matches!(c, '(' | ')' | '"' | '\'' | '/'));
    map(
        many0(alt((elided_comment, string_token, paren_block, run, tag("/")))),
        |parts: Vec<&str>| parts.concat(),
    )
    .parse(input)
}

// --- Rules ---

fn rule_list(input: &str, nested: bool) -> PResult<'_, Vec<Rule>> {
    let mut input = input;
    let mut rules = Vec::new();
    loop {
        (input, _) = sp(input)?;
        if input.is_empty() {
            return if nested {
                failure(input, "missing '}'")
            } else {
                Ok((input, rules))
            };
        }
        if input.starts_with('}') {
            return if nested {
                Ok((input, rules))
            } else {
                failure(input, "unexpected '}'")
            };
        }
        if !nested {
            if let Some(rest) = input.strip_prefix("<!--").or_else(|| input.strip_prefix("-->")) {
                input = rest;
                continue;
            }
        }
        let (rest, rule) = if input.starts_with('@') {
            at_rule(input)?
        } else {
            qualified_rule(input)?
        };
        rules.push(rule);
        input = rest;
    }
}

fn qualified_rule(input: &str) -> PResult<'_, Rule> {
    let (input, prelude) = text_until(input, &['{', '}', ';'])?;
    let prelude = prelude.trim();
    if prelude.is_empty() {
        return failure(input, "selector missing");
    }
    if !input.starts_with('{') {
        return failure(input, "missing '{'");
    }
    let (input, (declarations, rules)) = declaration_block(input)?;
    Ok((
        input,
        Rule {
            prelude: prelude.to_string(),
            declarations,
            rules,
        },
    ))
}

fn at_rule(input: &str) -> PResult<'_, Rule> {
    let (rest, name) = preceded(
        char('@'),
        cut(expect("at-rule missing name", take_while1(is_ident_char))),
    )
    .parse(input)?;
    let (rest, tail) = text_until(rest, &['{', '}', ';'])?;
    let prelude = format!("@{} {}", name, tail.trim()).trim_end().to_string();

    if let Some(after) = rest.strip_prefix(';') {
        return Ok((after, Rule { prelude, ..Default::default() }));
    }
    // A statement at-rule may also end at the enclosing block or the input.
    if rest.is_empty() || rest.starts_with('}') {
        return Ok((rest, Rule { prelude, ..Default::default() }));
    }

    if !rest.starts_with('{') {
        return failure(rest, "unexpected token");
    }

    if NESTING_AT_RULES.contains(&name.to_ascii_lowercase().as_str()) {
        let (rest, rules) = rule_list(&rest[1..], true)?;
        Ok((
            &rest[1..],
            Rule {
                prelude,
                declarations: Vec::new(),
                rules,
            },
        ))
    } else {
        let (rest, (declarations, rules)) = declaration_block(rest)?;
        Ok((
            rest,
            Rule {
                prelude,
                declarations,
                rules,
            },
        ))
    }
}

fn declaration_block(input: &str) -> PResult<'_, (Vec<Declaration>, Vec<Rule>)> {
    let Some(mut input) = input.strip_prefix('{') else {
        return failure(input, "missing '{'");
    };
    let mut declarations = Vec::new();
    let mut rules = Vec::new();
    loop {
        (input, _) = sp(input)?;
        if input.is_empty() {
            return failure(input, "missing '}'");
        }
        if let Some(rest) = input.strip_prefix('}') {
            return Ok((rest, (declarations, rules)));
        }
        if let Some(rest) = input.strip_prefix(';') {
            input = rest;
            continue;
        }
        if input.starts_with('@') {
            let (rest, rule) = at_rule(input)?;
            rules.push(rule);
            input = rest;
            continue;
        }
        let (rest, declaration) = cut(declaration).parse(input)?;
        declarations.push(declaration);
        input = rest;
        if input.starts_with('{') {
            return failure(input, "unexpected '{'");
        }
    }
}

fn declaration(input: &str) -> PResult<'_, Declaration> {
    let (input, property) = expect(
        "expected a property name",
        take_while1(|c: char| is_ident_char(c) || c == '*'),
    )
    .parse(input)?;
    let (input, _) = sp(input)?;
    let (input, _) = cut(expect("property missing ':'", char(':'))).parse(input)?;
    let (input, _) = sp(input)?;
    let (input, value) = text_until(input, &[';', '{', '}'])?;
    Ok((
        input,
        Declaration {
            property: property.to_string(),
            value: value.trim().to_string(),
        },
    ))
}

// --- Values ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Url(String),
    Function(String),
    Str(String),
    Word(String),
    Open,
    Close,
    Skip,
}

fn value_token(input: &str) -> PResult<'_, Token> {
    alt((
        value(Token::Skip, multispace1),
        value(Token::Skip, comment),
        map(string_token, |s| Token::Str(unquote(s))),
        function_token,
        value(Token::Open, char('(')),
        value(Token::Close, char(')')),
        map(word, |w| Token::Word(unescape(w))),
        value(Token::Skip, anychar),
    ))
    .parse(input)
}

/// A backslash escape: up to six hex digits plus one optional space, or any
/// single character.
fn escape(input: &str) -> PResult<'_, &str> {
    recognize((
        char('\\'),
        alt((
            recognize((
                take_while_m_n(1, 6, |c: char| c.is_ascii_hexdigit()),
                opt(satisfy(char::is_whitespace)),
            )),
            recognize(anychar),
        )),
    ))
    .parse(input)
}

fn ident(input: &str) -> PResult<'_, &str> {
    recognize(many1_count(alt((take_while1(is_ident_char), escape)))).parse(input)
}

fn word(input: &str) -> PResult<'_, &str> {
    recognize(many1_count(alt((
        escape,
        take_while1(|c: char| !c.is_whitespace() && !matches!(c, '(' | ')' | '"' | '\'' | ',' | '\\')),
    ))))
    .parse(input)
}

fn function_token(input: &str) -> PResult<'_, Token> {
    let (rest, name) = terminated(ident, char('(')).parse(input)?;
    let name = unescape(name);
    if !name.eq_ignore_ascii_case("url") {
        return Ok((rest, Token::Function(name)));
    }
    match url_argument(rest) {
        Ok((after, url)) => Ok((after, Token::Url(url))),
        Err(_) => {
            let end = rest.find(')').map_or(rest.len(), |i| i + 1);
            let raw = rest[..end].trim_end_matches(')');
            Ok((&rest[end..], Token::Url(unescape(raw.trim()))))
        }
    }
}

/// The argument of `url(`, up to and including the closing parenthesis.
fn url_argument(input: &str) -> PResult<'_, String> {
    delimited(
        sp,
        alt((
            map(string_token, unquote),
            map(take_while(|c: char| c != ')' && !c.is_whitespace()), unescape),
        )),
        (sp, char(')')),
    )
    .parse(input)
}

/// Whether `text` starts with a scheme and `://`, or is scheme-relative.
fn looks_like_url(text: &str) -> bool {
    let text = text.trim().replace('\\', "/");
    if text.starts_with("//") {
        return true;
    }
    match text.split_once("://") {
        Some((scheme, _)) => {
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn unquote(token: &str) -> String {
    let inner = token.get(1..token.len().saturating_sub(1)).unwrap_or_default();
    unescape(inner)
}

/// Decode CSS escapes (`\41 `, `\"`, escaped newlines).
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let mut hex = String::new();
        while hex.len() < 6 {
            match chars.peek() {
                Some(h) if h.is_ascii_hexdigit() => {
                    hex.push(*h);
                    chars.next();
                }
                _ => break,
            }
        }
        if hex.is_empty() {
            match chars.next() {
                Some('\n') | None => {}
                Some(other) => out.push(other),
            }
        } else {
            let decoded = u32::from_str_radix(&hex, 16)
                .ok()
                .and_then(char::from_u32)
                .filter(|c| *c != '\0')
                .unwrap_or('\u{FFFD}');
            out.push(decoded);
            if chars.peek().is_some_and(|w| w.is_whitespace()) {
                chars.next();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rules_and_declarations() {
        let sheet = parse_stylesheet("body { color: red; margin: 0 }\n.a, .b{padding:1px}").unwrap();
        assert_eq!(sheet.rules.len(), 2);
        assert_eq!(sheet.rules[0].prelude, "body");
        assert_eq!(
            sheet.rules[0].declarations,
            vec![
                Declaration { property: "color".into(), value: "red".into() },
                Declaration { property: "margin".into(), value: "0".into() },
            ]
        );
        assert_eq!(sheet.rules[1].prelude, ".a, .b");
    }

    #[test]
    fn descends_into_grouping_rules() {
        let css = "@media (max-width: 600px) { p { background: url(x.png) } @supports (display:grid) { i { color: blue } } }";
        let sheet = parse_stylesheet(css).unwrap();
        assert_eq!(sheet.rules[0].at_keyword(), Some("media"));
        let all: Vec<_> = sheet.flatten().into_iter().map(|r| r.prelude.clone()).collect();
        assert_eq!(all.len(), 4);
        assert_eq!(all[1], "p");
        assert_eq!(all[3], "i");
    }

    #[test]
    fn keyframes_hold_rules() {
        let sheet = parse_stylesheet("@keyframes spin { from { opacity: 0 } 50% { opacity: .5 } }").unwrap();
        assert_eq!(sheet.rules[0].rules.len(), 2);
        assert_eq!(sheet.rules[0].rules[1].prelude, "50%");
    }

    #[test]
    fn font_face_keeps_declarations() {
        let sheet = parse_stylesheet("@font-face { font-family: X; src: url('a.woff2') format('woff2') }").unwrap();
        assert_eq!(sheet.rules[0].declarations[1].property, "src");
    }

    #[test]
    fn semicolon_inside_data_uri_does_not_split_declaration() {
        let css = "div { background: url(data:image/png;base64,AAAA); color: red }";
        let sheet = parse_stylesheet(css).unwrap();
        let decls = &sheet.rules[0].declarations;
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].value, "url(data:image/png;base64,AAAA)");
    }

    #[test]
    fn comments_are_ignored() {
        let sheet = parse_stylesheet("/* a */ p /* b */ { color /* c */ : red /* d */ ; }").unwrap();
        assert_eq!(sheet.rules[0].prelude, "p");
        assert_eq!(sheet.rules[0].declarations[0].value, "red");
    }

    #[test]
    fn statement_at_rules_have_no_block() {
        let sheet = parse_stylesheet("@import url(\"a.css\") screen; @charset \"utf-8\";").unwrap();
        assert_eq!(sheet.rules.len(), 2);
        assert_eq!(sheet.rules[0].prelude, "@import url(\"a.css\") screen");
        assert!(sheet.rules[0].declarations.is_empty());
    }

    #[test]
    fn reports_missing_brace_with_position() {
        let err = parse_stylesheet("p { color: red;\n").unwrap_err();
        assert_eq!(err.message, "missing '}'");
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 1);
    }

    #[test]
    fn reports_missing_colon() {
        let err = parse_stylesheet("p { color red }").unwrap_err();
        assert_eq!(err.message, "property missing ':'");
        assert_eq!((err.line, err.column), (1, 11));
    }

    #[test]
    fn reports_unclosed_comment_and_string() {
        assert_eq!(parse_stylesheet("p { } /* open").unwrap_err().message, "unclosed comment");
        assert_eq!(parse_stylesheet("p { content: \"open }").unwrap_err().message, "unclosed string");
    }

    #[test]
    fn rejects_stray_closing_brace() {
        assert_eq!(parse_stylesheet("}").unwrap_err().message, "unexpected '}'");
    }

    #[test]
    fn extracts_all_url_forms() {
        let urls = extract_urls("url(a.png), URL( 'b.png' ) , url(\"c.png\") no-repeat");
        assert_eq!(urls, vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn decodes_escapes_in_urls() {
        assert_eq!(extract_urls(r"url(ht\74 p://x)"), vec!["http://x"]);
        assert_eq!(extract_urls(r#"url("a\"b")"#), vec!["a\"b"]);
    }

    #[test]
    fn malformed_url_still_reported() {
        assert_eq!(extract_urls("url(http://evil.example/x.png"), vec!["http://evil.example/x.png"]);
    }

    #[test]
    fn escaped_function_names_are_decoded() {
        assert_eq!(extract_urls(r"u\72l(http://evil.example/x.png)"), vec!["http://evil.example/x.png"]);
        assert_eq!(extract_urls(r"\75 rl('a.png') repeat-x"), vec!["a.png"]);
        assert_eq!(extract_urls(r"U\52L(b.png)"), vec!["b.png"]);
    }

    #[test]
    fn image_set_strings_are_urls() {
        assert_eq!(
            extract_urls(r#"image-set("a.png" 1x, url(b.png) 2x)"#),
            vec!["a.png", "b.png"]
        );
        assert_eq!(
            extract_urls(r#"-webkit-image-set("http://evil.example/x.png" 1x)"#),
            vec!["http://evil.example/x.png"]
        );
        assert_eq!(
            extract_urls(r#"cross-fade(image-set("c.png" 1x) 50%, "d.png")"#),
            vec!["c.png", "d.png"]
        );
    }

    #[test]
    fn absolute_urls_outside_functions_are_reported() {
        assert_eq!(extract_urls(r#""https://evil.example/a.png""#), vec!["https://evil.example/a.png"]);
        assert_eq!(extract_urls("foo(//evil.example/a.png)"), vec!["//evil.example/a.png"]);
        assert_eq!(extract_urls(r"ht\74 p://evil.example/"), vec!["http://evil.example/"]);
    }

    #[test]
    fn ordinary_strings_and_words_are_not_urls() {
        assert!(extract_urls(r#""Helvetica Neue", sans-serif"#).is_empty());
        assert!(extract_urls(r#"local("Font") format("woff2")"#).is_empty());
        assert!(extract_urls("12px/1.5 calc(100% - 2px)").is_empty());
    }

    #[test]
    fn import_target_handles_both_forms() {
        assert_eq!(import_target("@import url(a.css)").as_deref(), Some("a.css"));
        assert_eq!(import_target("@IMPORT 'b.css' print").as_deref(), Some("b.css"));
        assert_eq!(import_target("@media print"), None);
    }
}
