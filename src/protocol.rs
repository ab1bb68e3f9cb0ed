//! Typed decode of inbound LDAP requests.
//!
//! Every field is checked for its expected class, form and tag before its
//! value is read, so a malformed request becomes an [`AppError::Decode`]
//! naming the offending field.

use tracing::debug;

use crate::ber::{Class, Packet, TAG_BOOLEAN, TAG_ENUMERATED, TAG_INTEGER, TAG_OCTET_STRING, TAG_SEQUENCE};
use crate::error::{AppError, Result};
use crate::filter;

/// Context tag of the `simple` AuthenticationChoice.
const AUTH_SIMPLE: u32 = 0;

/// The two parts of an LDAPMessage the dispatcher needs.
#[derive(Debug)]
pub struct Envelope<'a> {
    pub message_id: i64,
    pub operation: &'a Packet,
}

impl<'a> Envelope<'a> {
    /// Split an LDAPMessage into its message ID and protocol operation.
    ///
    /// The caller must already have rejected packets without children.
    pub fn parse(packet: &'a Packet) -> Result<Self> {
        let message_id = integer(field(packet, 0, "messageID")?, "messageID")?;
        let operation = field(packet, 1, "protocolOp")?;
        Ok(Self {
            message_id,
            operation,
        })
    }

    /// Only application-class constructed operations are routed.
    pub fn is_routable(&self) -> bool {
        self.operation.class == Class::Application && self.operation.constructed
    }
}

fn field<'a>(packet: &'a Packet, index: usize, name: &str) -> Result<&'a Packet> {
    packet
        .child(index)
        .ok_or_else(|| AppError::Decode(format!("missing field {}", name)))
}

fn expect(packet: &Packet, tag: u32, constructed: bool, name: &str) -> Result<()> {
    if packet.is(Class::Universal, constructed, tag) {
        Ok(())
    } else {
        Err(AppError::Decode(format!(
            "field {} has class {:?}, tag {} (constructed: {}), expected universal tag {}",
            name, packet.class, packet.tag, packet.constructed, tag
        )))
    }
}

fn integer(packet: &Packet, name: &str) -> Result<i64> {
    expect(packet, TAG_INTEGER, false, name)?;
    packet
        .as_i64()
        .map_err(|e| AppError::Decode(format!("field {}: {}", name, e)))
}

fn enumerated(packet: &Packet, name: &str) -> Result<i64> {
    expect(packet, TAG_ENUMERATED, false, name)?;
    packet
        .as_i64()
        .map_err(|e| AppError::Decode(format!("field {}: {}", name, e)))
}

fn string(packet: &Packet, name: &str) -> Result<String> {
    expect(packet, TAG_OCTET_STRING, false, name)?;
    packet
        .as_str()
        .map(str::to_string)
        .map_err(|e| AppError::Decode(format!("field {}: {}", name, e)))
}

fn boolean(packet: &Packet, name: &str) -> Result<bool> {
    expect(packet, TAG_BOOLEAN, false, name)?;
    packet
        .as_bool()
        .map_err(|e| AppError::Decode(format!("field {}: {}", name, e)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAuthentication {
    /// Password octets of a simple bind.
    Simple(Vec<u8>),
    /// Any other AuthenticationChoice, identified by its context tag.
    Unsupported(u32),
}

/// ```text
/// BindRequest ::= [APPLICATION 0] SEQUENCE {
///     version                 INTEGER (1 ..  127),
///     name                    LDAPDN,
///     authentication          AuthenticationChoice
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub version: i64,
    pub name: String,
    pub authentication: BindAuthentication,
}

impl BindRequest {
    pub fn decode(operation: &Packet) -> Result<Self> {
        let version = integer(field(operation, 0, "version")?, "version")?;
        let name = string(field(operation, 1, "name")?, "name")?;

        let auth = field(operation, 2, "authentication")?;
        if auth.class != Class::Context {
            return Err(AppError::Decode(format!(
                "field authentication has class {:?}, expected context-specific",
                auth.class
            )));
        }
        let authentication = if auth.tag == AUTH_SIMPLE && !auth.constructed {
            BindAuthentication::Simple(auth.value.clone())
        } else {
            BindAuthentication::Unsupported(auth.tag)
        };

        Ok(Self {
            version,
            name,
            authentication,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    BaseObject,
    SingleLevel,
    WholeSubtree,
}

impl TryFrom<i64> for SearchScope {
    type Error = AppError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(SearchScope::BaseObject),
            1 => Ok(SearchScope::SingleLevel),
            2 => Ok(SearchScope::WholeSubtree),
            other => Err(AppError::Decode(format!("unknown search scope {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerefAliases {
    Never,
    InSearching,
    FindingBaseObject,
    Always,
}

impl TryFrom<i64> for DerefAliases {
    type Error = AppError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(DerefAliases::Never),
            1 => Ok(DerefAliases::InSearching),
            2 => Ok(DerefAliases::FindingBaseObject),
            3 => Ok(DerefAliases::Always),
            other => Err(AppError::Decode(format!("unknown derefAliases {}", other))),
        }
    }
}

/// ```text
/// SearchRequest ::= [APPLICATION 3] SEQUENCE {
///     baseObject      LDAPDN,
///     scope           ENUMERATED { baseObject (0), singleLevel (1), wholeSubtree (2) },
///     derefAliases    ENUMERATED,
///     sizeLimit       INTEGER (0 ..  maxInt),
///     timeLimit       INTEGER (0 ..  maxInt),
///     typesOnly       BOOLEAN,
///     filter          Filter,
///     attributes      AttributeSelection
/// }
/// ```
///
/// Limits, `typesOnly` and `derefAliases` are decoded but not acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: SearchScope,
    pub deref_aliases: DerefAliases,
    pub size_limit: i64,
    pub time_limit: i64,
    pub types_only: bool,
    /// RFC 4515 rendering of the filter, for logging. Empty if it could not
    /// be decompiled.
    pub filter: String,
    pub attributes: Vec<String>,
}

impl SearchRequest {
    pub fn decode(operation: &Packet) -> Result<Self> {
        let base_dn = string(field(operation, 0, "baseObject")?, "baseObject")?;
        let scope = SearchScope::try_from(enumerated(field(operation, 1, "scope")?, "scope")?)?;
        let deref_aliases =
            DerefAliases::try_from(enumerated(field(operation, 2, "derefAliases")?, "derefAliases")?)?;
        let size_limit = integer(field(operation, 3, "sizeLimit")?, "sizeLimit")?;
        let time_limit = integer(field(operation, 4, "timeLimit")?, "timeLimit")?;
        let types_only = boolean(field(operation, 5, "typesOnly")?, "typesOnly")?;

        let filter = filter::decompile(field(operation, 6, "filter")?).unwrap_or_else(|e| {
            debug!("Could not decompile search filter: {}", e);
            String::new()
        });

        let selection = field(operation, 7, "attributes")?;
        expect(selection, TAG_SEQUENCE, true, "attributes")?;
        let attributes = selection
            .children
            .iter()
            .map(|attribute| string(attribute, "attributes"))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base_dn,
            scope,
            deref_aliases,
            size_limit,
            time_limit,
            types_only,
            filter,
            attributes,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Request builders shared by handler tests.

    use super::*;
    use crate::ldap_lib::op;

    pub fn bind_request(name: &str, password: &str) -> Packet {
        Packet::constructed(Class::Application, op::BIND_REQUEST, "Bind Request")
            .with_child(Packet::integer(3, "version"))
            .with_child(Packet::octet_string(name, "name"))
            .with_child(Packet::primitive(
                Class::Context,
                AUTH_SIMPLE,
                password.as_bytes().to_vec(),
                "simple",
            ))
    }

    pub fn present_filter(attribute: &str) -> Packet {
        Packet::primitive(Class::Context, 7, attribute.as_bytes().to_vec(), "present")
    }

    pub fn search_request(base: &str, scope: i64, attributes: &[&str]) -> Packet {
        let selection = attributes
            .iter()
            .fold(Packet::sequence("attributes"), |seq, attribute| {
                seq.with_child(Packet::octet_string(*attribute, "attribute"))
            });
        Packet::constructed(Class::Application, op::SEARCH_REQUEST, "Search Request")
            .with_child(Packet::octet_string(base, "baseObject"))
            .with_child(Packet::enumerated(scope, "scope"))
            .with_child(Packet::enumerated(0, "derefAliases"))
            .with_child(Packet::integer(0, "sizeLimit"))
            .with_child(Packet::integer(0, "timeLimit"))
            .with_child(Packet::boolean(false, "typesOnly"))
            .with_child(present_filter("objectClass"))
            .with_child(selection)
    }
}
