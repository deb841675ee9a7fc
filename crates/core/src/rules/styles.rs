//! Presentation rules.
//!
//! A fixed `document-styles` template emitting one `<style>` block. It does not depend on the
//! metadata descriptor and is identical for every tenant and document type.

use super::{FragmentCategory, RuleFragment};

const DOCUMENT_STYLES: &str = "\
.cda-document { font-family: sans-serif; font-size: 14px; color: #222222; }
.cda-document h1 { font-size: 1.6em; margin: 0 0 0.6em 0; }
.cda-document h2 { font-size: 1.3em; border-bottom: 1px solid #cccccc; }
.cda-document h3, .cda-document h4, .cda-document h5, .cda-document h6 { font-size: 1.1em; }
.header-block { margin-bottom: 1em; }
.header-table, .diagnosis-grid, .observation-table, .narrative-table { border-collapse: collapse; margin: 0.4em 0; }
.header-table th, .diagnosis-grid th, .observation-table th { text-align: left; padding: 2px 12px 2px 0; color: #555555; }
.header-table td, .diagnosis-grid td, .observation-table td { padding: 2px 0; }
.narrative-table th, .narrative-table td { border: 1px solid #cccccc; padding: 2px 6px; }
.cda-section { margin: 1em 0; }
.code-ref { color: #777777; font-size: 0.9em; }
.notice { font-style: italic; color: #8a6d3b; }
.warning { font-weight: bold; color: #a94442; }
.external-content { border: 0; }
";

/// Builds the styles fragment.
pub fn build() -> RuleFragment {
    let markup = format!(
        "<xsl:template name=\"document-styles\"><style type=\"text/css\">{DOCUMENT_STYLES}</style></xsl:template>\n"
    );
    RuleFragment::new(FragmentCategory::Styles, markup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_styles_fragment_is_fixed() {
        let first = build();
        let second = build();
        assert_eq!(first, second);
        assert_eq!(first.category(), FragmentCategory::Styles);
        assert!(first.markup().contains("name=\"document-styles\""));
    }

    #[test]
    fn test_styles_need_no_markup_escaping() {
        assert!(!DOCUMENT_STYLES.contains(['<', '>', '&']));
    }
}
