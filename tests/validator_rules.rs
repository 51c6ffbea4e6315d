//! Validator rules as seen by callers of the public API

use html2img::validator::{AllowList, Rejection, Validator};

const TRUSTED: &str = "https://cdn.example.com/trusted/";

fn validator() -> Validator {
    Validator::new(AllowList::new([TRUSTED]).unwrap())
}

#[test]
fn script_rejects_regardless_of_other_content() {
    let v = validator();
    let cases = [
        "<script>x</script>",
        "<div>ok</div><script src=\"https://cdn.example.com/trusted/a.js\"></script>",
        "<img src=\"data:image/png;base64,AAAA\"><SCRIPT>alert(1)</SCRIPT>",
        "<style>p{color:red}</style><p><script></script></p>",
        // reported before the later iframe rule
        "<iframe></iframe><script></script>",
        "<svg><script>1</script></svg>",
    ];
    for markup in cases {
        assert_eq!(v.validate(markup), Some(Rejection::Script), "{}", markup);
    }
}

#[test]
fn plain_markup_is_accepted() {
    let v = validator();
    let cases = [
        "",
        "<div>hi</div>",
        "plain text & entities &lt;",
        "<table><tr><td>1</td><td><b>2</b></td></tr></table>",
        "<p class=\"a\" style=\"color: red\">styled inline</p>",
        "<div><span>unclosed",
        "<a href=\"https://anywhere.example\">link text</a>",
    ];
    for markup in cases {
        assert_eq!(v.validate(markup), None, "{}", markup);
    }
}

#[test]
fn external_links_and_frames_reject() {
    let v = validator();
    assert_eq!(
        v.validate("<link rel=\"stylesheet\" href=\"https://cdn.example.com/trusted/a.css\">"),
        Some(Rejection::ExternalLink)
    );
    assert_eq!(v.validate("<iframe src=\"about:blank\"></iframe>"), Some(Rejection::Frame));
}

#[test]
fn image_sources() {
    let v = validator();
    assert_eq!(v.validate("<img src=\"data:image/png;base64,AAAA\">"), None);
    assert_eq!(v.validate("<img src=\"https://cdn.example.com/trusted/path/x.png\">"), None);
    assert_eq!(
        v.validate("<img src=\"http://evil.example/x.png\">"),
        Some(Rejection::ImageSource("http://evil.example/x.png".into()))
    );
}

#[test]
fn one_bad_image_rejects_the_whole_document() {
    let v = validator();
    let markup = "<img src=\"data:image/png;base64,AAAA\"><img src=\"http://169.254.169.254/latest\">";
    assert!(matches!(v.validate(markup), Some(Rejection::ImageSource(_))));
}

#[test]
fn stylesheet_urls_are_symmetric_across_quoting() {
    let v = validator();
    let good = "https://cdn.example.com/trusted/bg.png";
    let bad = "http://evil.example/x.png";
    for (open, close) in [("'", "'"), ("\"", "\""), ("", "")] {
        let accepted = format!("<style>div {{ background: url({}{}{}) }}</style>", open, good, close);
        assert_eq!(v.validate(&accepted), None, "{}", accepted);

        let rejected = format!("<style>div {{ background: url({}{}{}) }}</style>", open, bad, close);
        assert_eq!(
            v.validate(&rejected),
            Some(Rejection::StyleResource(bad.to_string())),
            "{}",
            rejected
        );
    }
}

#[test]
fn stylesheet_url_rejection_reason_mentions_external_resource() {
    let v = validator();
    let reason = v
        .validate("<style>body{background:url(http://evil.example/x.png)}</style>")
        .unwrap()
        .to_string();
    assert!(reason.contains("disallowed external resource"), "{}", reason);
}

#[test]
fn styles_from_several_blocks_are_checked() {
    let v = validator();
    let markup = "<style>p{color:red}</style><div><style>b{background:url(//evil.example/a)}</style></div>";
    assert!(matches!(v.validate(markup), Some(Rejection::StyleResource(_))));
}

#[test]
fn data_uris_in_stylesheets_are_accepted() {
    let v = validator();
    let markup = "<style>i{background:url(data:image/svg+xml;base64,PHN2Zz4=);color:blue}</style>";
    assert_eq!(v.validate(markup), None);
}

#[test]
fn image_set_candidates_are_checked() {
    let v = validator();
    let cases = [
        (
            r#"<style>div{background-image:image-set("http://169.254.169.254/latest/meta-data" 1x)}</style>"#,
            "http://169.254.169.254/latest/meta-data",
        ),
        (
            r#"<style>div{background-image:-webkit-image-set("http://evil.example/x.png" 1x)}</style>"#,
            "http://evil.example/x.png",
        ),
        (
            r#"<style>div{background:image-set('relative.png' 1x)}</style>"#,
            "relative.png",
        ),
    ];
    for (markup, url) in cases {
        assert_eq!(v.validate(markup), Some(Rejection::StyleResource(url.into())), "{}", markup);
    }

    let trusted = format!(
        r#"<style>div{{background-image:image-set("{TRUSTED}a.png" 1x, url({TRUSTED}b.png) 2x)}}</style>"#
    );
    assert_eq!(v.validate(&trusted), None);
}

#[test]
fn escaped_url_function_is_checked() {
    let v = validator();
    assert_eq!(
        v.validate(r"<style>body{background:u\72l(http://evil.example/x.png)}</style>"),
        Some(Rejection::StyleResource("http://evil.example/x.png".into()))
    );
    assert_eq!(
        v.validate(r"<style>body{background:\55 RL('http://evil.example/y.png')}</style>"),
        Some(Rejection::StyleResource("http://evil.example/y.png".into()))
    );
}

#[test]
fn absolute_urls_in_unknown_functions_reject() {
    let v = validator();
    assert!(matches!(
        v.validate(r#"<style>div{mask:some-new-fn("https://evil.example/m.svg")}</style>"#),
        Some(Rejection::StyleResource(_))
    ));
    // selectors and plain strings do not fetch
    let markup = r#"<style>a[href^="https://"]{font-family:"Helvetica Neue",sans-serif;content:"see below"}</style>"#;
    assert_eq!(v.validate(markup), None);
}

#[test]
fn font_face_sources_are_checked() {
    let v = validator();
    let markup = "<style>@font-face{font-family:x;src:url(\"https://fonts.evil.example/x.woff2\") format(\"woff2\")}</style>";
    assert!(matches!(v.validate(markup), Some(Rejection::StyleResource(_))));
}

#[test]
fn broken_stylesheet_rejects_with_parser_message() {
    let v = validator();
    match v.validate("<style>p { color: red </style>") {
        Some(Rejection::StylesheetParse(message)) => assert!(message.contains("1:"), "{}", message),
        other => panic!("unexpected verdict {:?}", other),
    }
}

#[test]
fn empty_allow_list_only_permits_data_uris() {
    let v = Validator::new(AllowList::default());
    assert_eq!(v.validate("<img src=\"data:image/gif;base64,R0lGOD\">"), None);
    assert!(v.validate("<img src=\"https://cdn.example.com/trusted/x.png\">").is_some());
}

#[test]
fn strict_mode_adds_attribute_rules() {
    let v = validator().strict(true);
    assert_eq!(
        v.validate("<div onclick=\"x()\">a</div>"),
        Some(Rejection::EventHandler("onclick".into()))
    );
    assert_eq!(v.validate("<embed src=\"x\">"), Some(Rejection::Embed("embed".into())));
    assert!(matches!(
        v.validate("<div style=\"background:url(http://evil.example/a)\">a</div>"),
        Some(Rejection::StyleAttribute(_))
    ));
    assert!(matches!(
        v.validate("<img srcset=\"http://evil.example/a.png 2x\">"),
        Some(Rejection::ResourceAttribute(_))
    ));
    assert_eq!(v.validate("<div>hi</div>"), None);
}
