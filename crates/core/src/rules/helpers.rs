//! Formatting helper templates.
//!
//! A fixed library of named templates shared by the header and section rules: names,
//! genders, codes, addresses, telecoms, identifiers with null flavors, timestamps with a
//! Spanish month table, and the sanitising renderer for external references.

use super::{escape_markup, xpath_literal, FragmentCategory, RuleFragment};
use crate::constants::{MALICIOUS_CONTENT_WARNING, SCRIPT_REFERENCE_WARNING, SCRUBBED_CHARACTERS};

/// Month names indexed by month number minus one.
pub const MONTH_NAMES: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

/// Display text per null flavor code.
pub const NULL_FLAVORS: [(&str, &str); 7] = [
    ("MSK", "Enmascarado"),
    ("UNK", "Desconocido"),
    ("NA", "No aplica"),
    ("ASKU", "Preguntado pero desconocido"),
    ("NI", "Sin información"),
    ("NAV", "Temporalmente no disponible"),
    ("OTH", "Otro"),
];

/// Administrative gender display text per code.
pub const GENDERS: [(&str, &str); 3] = [
    ("M", "Masculino"),
    ("F", "Femenino"),
    ("UN", "Indiferenciado"),
];

const FORMAT_NAME: &str = r#"<xsl:template name="format-name">
<xsl:param name="name"/>
<xsl:variable name="full">
<xsl:for-each select="$name/n1:prefix"><xsl:value-of select="."/><xsl:text> </xsl:text></xsl:for-each>
<xsl:for-each select="$name/n1:given"><xsl:value-of select="."/><xsl:text> </xsl:text></xsl:for-each>
<xsl:for-each select="$name/n1:family"><xsl:value-of select="."/><xsl:text> </xsl:text></xsl:for-each>
<xsl:for-each select="$name/n1:suffix"><xsl:value-of select="."/><xsl:text> </xsl:text></xsl:for-each>
</xsl:variable>
<xsl:choose>
<xsl:when test="normalize-space($full) != ''"><xsl:value-of select="normalize-space($full)"/></xsl:when>
<xsl:otherwise><xsl:value-of select="normalize-space($name)"/></xsl:otherwise>
</xsl:choose>
</xsl:template>
"#;

const FORMAT_CODE: &str = r#"<xsl:template name="format-code">
<xsl:param name="code"/>
<xsl:choose>
<xsl:when test="normalize-space($code/@displayName) != ''"><xsl:value-of select="$code/@displayName"/></xsl:when>
<xsl:when test="normalize-space($code/n1:originalText) != ''"><xsl:value-of select="normalize-space($code/n1:originalText)"/></xsl:when>
<xsl:when test="$code/@nullFlavor"><xsl:call-template name="null-flavor-display"><xsl:with-param name="flavor" select="$code/@nullFlavor"/></xsl:call-template></xsl:when>
<xsl:otherwise><xsl:value-of select="$code/@code"/></xsl:otherwise>
</xsl:choose>
</xsl:template>
"#;

const FORMAT_ADDRESS: &str = r#"<xsl:template name="format-address">
<xsl:param name="addr"/>
<xsl:choose>
<xsl:when test="$addr/n1:*">
<xsl:for-each select="$addr/n1:streetAddressLine | $addr/n1:city | $addr/n1:state | $addr/n1:postalCode | $addr/n1:country">
<xsl:if test="position() &gt; 1"><xsl:text>, </xsl:text></xsl:if>
<xsl:value-of select="normalize-space(.)"/>
</xsl:for-each>
</xsl:when>
<xsl:otherwise><xsl:value-of select="normalize-space($addr)"/></xsl:otherwise>
</xsl:choose>
</xsl:template>
"#;

const FORMAT_TELECOM: &str = r#"<xsl:template name="format-telecom">
<xsl:param name="telecom"/>
<xsl:variable name="value" select="normalize-space($telecom/@value)"/>
<xsl:choose>
<xsl:when test="starts-with($value, 'tel:')"><xsl:value-of select="substring-after($value, 'tel:')"/></xsl:when>
<xsl:when test="starts-with($value, 'mailto:')"><xsl:value-of select="substring-after($value, 'mailto:')"/></xsl:when>
<xsl:otherwise><xsl:value-of select="$value"/></xsl:otherwise>
</xsl:choose>
</xsl:template>
"#;

const FORMAT_CONTACT: &str = r#"<xsl:template name="format-contact">
<xsl:param name="contact"/>
<xsl:for-each select="$contact/n1:telecom[@value]">
<xsl:if test="position() &gt; 1"><xsl:text>; </xsl:text></xsl:if>
<xsl:call-template name="format-telecom"><xsl:with-param name="telecom" select="."/></xsl:call-template>
</xsl:for-each>
</xsl:template>
"#;

const FORMAT_IDENTIFIER: &str = r#"<xsl:template name="format-identifier">
<xsl:param name="id"/>
<xsl:choose>
<xsl:when test="$id/@nullFlavor"><xsl:call-template name="null-flavor-display"><xsl:with-param name="flavor" select="$id/@nullFlavor"/></xsl:call-template></xsl:when>
<xsl:when test="$id/@extension">
<xsl:value-of select="$id/@extension"/>
<xsl:if test="$id/@root"><xsl:text> (</xsl:text><xsl:value-of select="$id/@root"/><xsl:text>)</xsl:text></xsl:if>
</xsl:when>
<xsl:otherwise><xsl:value-of select="$id/@root"/></xsl:otherwise>
</xsl:choose>
</xsl:template>
"#;

// Time parts are rendered only while they are exactly two digits, so a trailing UTC offset
// such as `+0200` never shows up as minutes or seconds.
const FORMAT_DATE_TIME: &str = r#"<xsl:template name="format-date-time">
<xsl:param name="value"/>
<xsl:variable name="stamp" select="normalize-space($value)"/>
<xsl:choose>
<xsl:when test="string-length($stamp) &gt;= 8 and translate(substring($stamp, 1, 8), '0123456789', '') = ''">
<xsl:variable name="hour" select="substring($stamp, 9, 2)"/>
<xsl:variable name="minute" select="substring($stamp, 11, 2)"/>
<xsl:variable name="second" select="substring($stamp, 13, 2)"/>
<xsl:value-of select="number(substring($stamp, 7, 2))"/>
<xsl:text>-</xsl:text>
<xsl:call-template name="month-name"><xsl:with-param name="month" select="substring($stamp, 5, 2)"/></xsl:call-template>
<xsl:text>-</xsl:text>
<xsl:value-of select="substring($stamp, 1, 4)"/>
<xsl:if test="string-length($hour) = 2 and translate($hour, '0123456789', '') = ''">
<xsl:text>, </xsl:text><xsl:value-of select="$hour"/>
<xsl:if test="string-length($minute) = 2 and translate($minute, '0123456789', '') = ''">
<xsl:text>:</xsl:text><xsl:value-of select="$minute"/>
<xsl:if test="string-length($second) = 2 and translate($second, '0123456789', '') = ''">
<xsl:text>:</xsl:text><xsl:value-of select="$second"/>
</xsl:if>
</xsl:if>
</xsl:if>
</xsl:when>
<xsl:otherwise><xsl:value-of select="$stamp"/></xsl:otherwise>
</xsl:choose>
</xsl:template>
"#;

/// Builds a `choose` lookup template over `param`, falling back to the raw value.
fn lookup_template(name: &str, param: &str, entries: &[(String, &str)]) -> String {
    let mut out = format!(
        "<xsl:template name=\"{name}\">\n<xsl:param name=\"{param}\"/>\n<xsl:choose>\n"
    );
    for (key, display) in entries {
        out.push_str(&format!(
            "<xsl:when test=\"{}\">{}</xsl:when>\n",
            escape_markup(&format!("${param} = {}", xpath_literal(key))),
            escape_markup(display)
        ));
    }
    out.push_str(&format!(
        "<xsl:otherwise><xsl:value-of select=\"${param}\"/></xsl:otherwise>\n</xsl:choose>\n</xsl:template>\n"
    ));
    out
}

fn month_name() -> String {
    let entries: Vec<(String, &str)> = MONTH_NAMES
        .iter()
        .enumerate()
        .map(|(index, month)| (format!("{:02}", index + 1), *month))
        .collect();
    lookup_template("month-name", "month", &entries)
}

fn code_lookup(name: &str, param: &str, table: &[(&str, &str)]) -> String {
    let entries: Vec<(String, &str)> = table
        .iter()
        .map(|(code, display)| (code.to_string(), *display))
        .collect();
    lookup_template(name, param, &entries)
}

fn render_external_reference() -> String {
    let stars = "*".repeat(SCRUBBED_CHARACTERS.chars().count());
    let scrubbed = format!(
        "translate($reference, {}, '{stars}')",
        xpath_literal(SCRUBBED_CHARACTERS)
    );
    format!(
        r#"<xsl:template name="render-external-reference">
<xsl:param name="reference"/>
<xsl:variable name="scrubbed" select="{scrubbed}"/>
<xsl:choose>
<xsl:when test="contains(translate($reference, $uc, $lc), 'javascript')"><p class="warning">{script}</p></xsl:when>
<xsl:when test="$scrubbed != string($reference)"><p class="warning">{malicious}</p></xsl:when>
<xsl:otherwise><iframe class="external-content" src="{{$reference}}" sandbox="" referrerpolicy="no-referrer" width="100%" height="600"></iframe></xsl:otherwise>
</xsl:choose>
</xsl:template>
"#,
        scrubbed = escape_markup(&scrubbed),
        script = escape_markup(SCRIPT_REFERENCE_WARNING),
        malicious = escape_markup(MALICIOUS_CONTENT_WARNING),
    )
}

/// Builds the helpers fragment.
pub fn build() -> RuleFragment {
    let mut markup = String::new();
    markup.push_str(FORMAT_NAME);
    markup.push_str(&code_lookup("format-gender", "code", &GENDERS));
    markup.push_str(FORMAT_CODE);
    markup.push_str(FORMAT_ADDRESS);
    markup.push_str(FORMAT_TELECOM);
    markup.push_str(FORMAT_CONTACT);
    markup.push_str(FORMAT_IDENTIFIER);
    markup.push_str(&code_lookup("null-flavor-display", "flavor", &NULL_FLAVORS));
    markup.push_str(FORMAT_DATE_TIME);
    markup.push_str(&month_name());
    markup.push_str(&render_external_reference());
    RuleFragment::new(FragmentCategory::Helpers, markup)
}
