//! LDAP Response Builder
//!
//! Protocol-level reply structures and their conversion into [`Packet`] trees.
//! Nothing here touches raw bytes; serialization happens in [`crate::ber`].
//!
//! # Message layout (RFC 4511 Section 4.1.1)
//! ```text
//! LDAPMessage ::= SEQUENCE {
//!     messageID       MessageID,
//!     protocolOp      CHOICE { bindRequest, bindResponse, ... },
//!     controls        [0] Controls OPTIONAL
//! }
//! ```
//!
//! # LDAP Result Codes
//! The result codes this server produces:
//! - 0: success
//! - 2: protocol error
//! - 32: no such object
//! - 49: invalid credentials
//! - 80: other

use crate::ber::{Class, Packet};

/// Application tags of the protocol operations this server understands.
pub mod op {
    pub const BIND_REQUEST: u32 = 0;
    pub const BIND_RESPONSE: u32 = 1;
    pub const UNBIND_REQUEST: u32 = 2;
    pub const SEARCH_REQUEST: u32 = 3;
    pub const SEARCH_RESULT_ENTRY: u32 = 4;
    pub const SEARCH_RESULT_DONE: u32 = 5;

    pub fn name(tag: u32) -> &'static str {
        match tag {
            BIND_REQUEST => "BindRequest",
            BIND_RESPONSE => "BindResponse",
            UNBIND_REQUEST => "UnbindRequest",
            SEARCH_REQUEST => "SearchRequest",
            SEARCH_RESULT_ENTRY => "SearchResultEntry",
            SEARCH_RESULT_DONE => "SearchResultDone",
            _ => "Unknown",
        }
    }
}

/// LDAP Result Codes (RFC 4511 Appendix A)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LdapResultCode {
    Success = 0,
    ProtocolError = 2,
    NoSuchObject = 32,
    InvalidCredentials = 49,
    Other = 80,
}

impl LdapResultCode {
    pub fn name(self) -> &'static str {
        match self {
            LdapResultCode::Success => "success",
            LdapResultCode::ProtocolError => "protocolError",
            LdapResultCode::NoSuchObject => "noSuchObject",
            LdapResultCode::InvalidCredentials => "invalidCredentials",
            LdapResultCode::Other => "other",
        }
    }
}

/// Wrap a protocol operation in the LDAPMessage envelope.
pub fn ldap_message(message_id: i64, operation: Packet) -> Packet {
    Packet::sequence("LDAP Response")
        .with_child(Packet::integer(message_id, "MessageID"))
        .with_child(operation)
}

/// An LDAPResult body under the given application tag, with empty matched
/// DN and diagnostic message.
///
/// ```text
/// LDAPResult ::= SEQUENCE {
///     resultCode         ENUMERATED,
///     matchedDN          LDAPDN,
///     diagnosticMessage  LDAPString,
///     referral           [3] Referral OPTIONAL
/// }
/// ```
fn ldap_result(tag: u32, code: LdapResultCode, description: &'static str) -> Packet {
    Packet::constructed(Class::Application, tag, description)
        .with_child(Packet::enumerated(code as i64, "resultCode"))
        .with_child(Packet::octet_string("", "matchedDN"))
        .with_child(Packet::octet_string("", "diagnosticMessage"))
}

/// Creates an LDAP Bind Response (RFC 4511 Section 4.2.2)
pub fn create_bind_response(message_id: i64, code: LdapResultCode) -> Packet {
    ldap_message(
        message_id,
        ldap_result(op::BIND_RESPONSE, code, "Bind Response"),
    )
}

/// Creates an LDAP Search Result Done (RFC 4511 Section 4.5.2)
pub fn create_search_done_response(message_id: i64, code: LdapResultCode) -> Packet {
    ldap_message(
        message_id,
        ldap_result(op::SEARCH_RESULT_DONE, code, "Search Result Done"),
    )
}

/// One attribute description with its values.
///
/// ```text
/// PartialAttribute ::= SEQUENCE {
///     type       AttributeDescription,
///     vals       SET OF value AttributeValue
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAttribute {
    pub name: String,
    pub values: Vec<String>,
}

impl PartialAttribute {
    pub fn to_packet(&self) -> Packet {
        let values = self
            .values
            .iter()
            .fold(Packet::set("Attribute Values"), |set, value| {
                set.with_child(Packet::octet_string(value.as_str(), "Attribute Value"))
            });
        Packet::sequence("Attribute")
            .with_child(Packet::octet_string(self.name.as_str(), "Attribute Name"))
            .with_child(values)
    }
}

/// A search result entry before encoding. Attributes keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResultEntry {
    pub dn: String,
    pub attributes: Vec<PartialAttribute>,
}

impl SearchResultEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.push(PartialAttribute {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
    }

    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_attribute(name, values);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&PartialAttribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Creates an LDAP Search Result Entry (RFC 4511 Section 4.5.2)
    ///
    /// ```text
    /// SearchResultEntry ::= [APPLICATION 4] SEQUENCE {
    ///     objectName      LDAPDN,
    ///     attributes      PartialAttributeList
    /// }
    /// ```
    pub fn to_packet(&self, message_id: i64) -> Packet {
        let attributes = self
            .attributes
            .iter()
            .fold(Packet::sequence("Attributes"), |list, attribute| {
                list.with_child(attribute.to_packet())
            });
        let entry = Packet::constructed(
            Class::Application,
            op::SEARCH_RESULT_ENTRY,
            "Search Result Entry",
        )
        .with_child(Packet::octet_string(self.dn.as_str(), "objectName"))
        .with_child(attributes);
        ldap_message(message_id, entry)
    }
}
