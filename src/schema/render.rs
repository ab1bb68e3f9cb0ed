//! RFC 4512 section 4.1 description strings for subschema attributes.
//!
//! ```text
//! ldapSyntaxes   ( oid DESC 'description' )
//! matchingRules  ( oid NAME 'name' SYNTAX syntax-oid )
//! attributeTypes ( oid NAME qdescrs [OBSOLETE] [SUP x] [EQUALITY x] [SUBSTR x] [ORDERING x]
//!                  [SYNTAX oid] [SINGLE-VALUE] [COLLECTIVE] [NO-USER-MODIFICATION] [USAGE u] )
//! objectClasses  ( oid NAME qdescrs [SUP x] KIND [MUST ( a $ b )] [MAY ( a $ b )] )
//! ```
//!
//! Every function here is a pure function of one entity, so the same entity
//! always renders to the same string.

use super::{
    AttributeType, AttributeTypeFlags, AttributeUsage, MatchingRule, ObjectClass, Syntax,
};

/// `'name'` for a single name, `( 'n1' 'n2' )` when aliases exist.
fn name_clause<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let quoted: Vec<String> = names.map(|n| format!("'{}'", n)).collect();
    match quoted.as_slice() {
        [single] => single.clone(),
        _ => format!("( {} )", quoted.join(" ")),
    }
}

fn oid_list(names: &[String]) -> String {
    format!("( {} )", names.join(" $ "))
}

impl Syntax {
    pub fn render(&self) -> String {
        format!("( {} DESC '{}' )", self.oid, self.description)
    }
}

impl MatchingRule {
    pub fn render(&self) -> String {
        let names =
            std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str));
        format!(
            "( {} NAME {} SYNTAX {} )",
            self.oid,
            name_clause(names),
            self.syntax
        )
    }
}

impl AttributeType {
    pub fn render(&self) -> String {
        let mut parts = vec![
            "(".to_string(),
            self.oid.clone(),
            "NAME".to_string(),
            name_clause(self.names()),
        ];

        if self.flags.contains(AttributeTypeFlags::OBSOLETE) {
            parts.push("OBSOLETE".to_string());
        }

        let clauses = [
            ("SUP", &self.superior),
            ("EQUALITY", &self.equality),
            ("SUBSTR", &self.substring),
            ("ORDERING", &self.ordering),
            ("SYNTAX", &self.syntax),
        ];
        for (keyword, value) in clauses {
            if let Some(value) = value {
                parts.push(format!("{} {}", keyword, value));
            }
        }

        for (flag, keyword) in [
            (AttributeTypeFlags::SINGLE_VALUE, "SINGLE-VALUE"),
            (AttributeTypeFlags::COLLECTIVE, "COLLECTIVE"),
            (
                AttributeTypeFlags::NO_USER_MODIFICATION,
                "NO-USER-MODIFICATION",
            ),
        ] {
            if self.flags.contains(flag) {
                parts.push(keyword.to_string());
            }
        }

        if self.usage != AttributeUsage::UserApplications {
            parts.push(format!("USAGE {}", self.usage.keyword()));
        }

        parts.push(")".to_string());
        parts.join(" ")
    }
}

impl ObjectClass {
    pub fn render(&self) -> String {
        let mut parts = vec![
            "(".to_string(),
            self.oid.clone(),
            "NAME".to_string(),
            name_clause(self.names()),
        ];
        if let Some(superior) = self.superior() {
            parts.push(format!("SUP {}", superior));
        }
        parts.push(self.kind.keyword().to_string());
        if !self.must.is_empty() {
            parts.push(format!("MUST {}", oid_list(&self.must)));
        }
        if !self.may.is_empty() {
            parts.push(format!("MAY {}", oid_list(&self.may)));
        }
        parts.push(")".to_string());
        parts.join(" ")
    }
}
