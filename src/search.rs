//! Search.
//!
//! A request resolves along exactly one path, checked in this order:
//! 1. `subschemaSubentry` requested: the root DSE pointer to `cn=schema`.
//! 2. `namingContexts` requested: the root DSE listing every root entry.
//! 3. base DN is `cn=schema`: the subschema subentry itself.
//! 4. anything else: directory entries selected by scope.
//!
//! Every path ends with one SearchResultDone, unless the store fails, in
//! which case nothing is written and the error goes back to the connection.
//! The filter is decoded for logging only and never restricts results.

use async_trait::async_trait;
use tracing::{debug, error};

use crate::ber::Packet;
use crate::context::ConnectionContext;
use crate::dispatch::{HandlerResponse, OperationHandler};
use crate::error::Result;
use crate::ldap_lib::{create_search_done_response, LdapResultCode, SearchResultEntry};
use crate::metrics;
use crate::models::DirectoryEntry;
use crate::protocol::{SearchRequest, SearchScope};
use crate::schema::SchemaCatalog;

/// DN of the subschema subentry.
pub const SCHEMA_DN: &str = "cn=schema";

/// RFC 4511 special selector meaning "no attributes".
pub const NO_ATTRIBUTES: &str = "1.1";

pub const SUBSCHEMA_SUBENTRY: &str = "subschemaSubentry";
pub const NAMING_CONTEXTS: &str = "namingContexts";
pub const OBJECT_CLASS: &str = "objectClass";

const LDAP_SYNTAXES: &str = "ldapSyntaxes";
const OBJECT_CLASSES: &str = "objectClasses";
const MATCHING_RULES: &str = "matchingRules";
const ATTRIBUTE_TYPES: &str = "attributeTypes";

/// Result of classifying the requested attribute list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AttributeSelection {
    /// Remaining attribute names, sorted.
    pub requested: Vec<String>,
    pub subschema: bool,
    pub naming_contexts: bool,
}

impl AttributeSelection {
    /// Exact, case-sensitive membership.
    pub fn contains(&self, name: &str) -> bool {
        self.requested
            .binary_search_by(|candidate| candidate.as_str().cmp(name))
            .is_ok()
    }
}

/// Classify the requested attributes.
///
/// `1.1` empties the list and ends the scan. `subschemaSubentry` and
/// `namingContexts` (any case) set their flags instead of being listed.
pub fn select_attributes(attributes: &[String]) -> AttributeSelection {
    let mut selection = AttributeSelection::default();
    for attribute in attributes {
        if attribute == NO_ATTRIBUTES {
            selection.requested.clear();
            break;
        } else if attribute.eq_ignore_ascii_case(SUBSCHEMA_SUBENTRY) {
            selection.subschema = true;
        } else if attribute.eq_ignore_ascii_case(NAMING_CONTEXTS) {
            selection.naming_contexts = true;
        } else {
            selection.requested.push(attribute.clone());
        }
    }
    selection.requested.sort();
    selection
}

/// Root DSE entry pointing clients at the subschema subentry.
pub fn subschema_entry() -> SearchResultEntry {
    SearchResultEntry::new("").with_attribute(SUBSCHEMA_SUBENTRY, [SCHEMA_DN])
}

/// Root DSE entry listing the naming contexts.
pub fn naming_contexts_entry(roots: &[DirectoryEntry]) -> SearchResultEntry {
    SearchResultEntry::new("")
        .with_attribute(NAMING_CONTEXTS, roots.iter().map(|root| root.dn.as_str()))
}

/// The `cn=schema` subentry: four fixed attributes, then each catalog
/// section that was requested by its exact name.
pub fn schema_entry(catalog: &SchemaCatalog, selection: &AttributeSelection) -> SearchResultEntry {
    let mut entry = SearchResultEntry::new(SCHEMA_DN)
        .with_attribute("cn", ["schema"])
        .with_attribute(OBJECT_CLASS, ["top"])
        .with_attribute(OBJECT_CLASS, ["ldapSubentry"])
        .with_attribute(OBJECT_CLASS, ["subschema"]);

    if selection.contains(LDAP_SYNTAXES) {
        entry.add_attribute(
            LDAP_SYNTAXES,
            catalog.syntaxes().iter().map(|syntax| syntax.render()),
        );
    }
    if selection.contains(OBJECT_CLASSES) {
        entry.add_attribute(
            OBJECT_CLASSES,
            catalog.object_classes().iter().map(|class| class.render()),
        );
    }
    if selection.contains(MATCHING_RULES) {
        entry.add_attribute(
            MATCHING_RULES,
            catalog.matching_rules().iter().map(|rule| rule.render()),
        );
    }
    if selection.contains(ATTRIBUTE_TYPES) {
        entry.add_attribute(
            ATTRIBUTE_TYPES,
            catalog.attribute_types().iter().map(|attribute| attribute.render()),
        );
    }
    entry
}

/// User attributes, then operational attributes, then the synthesized
/// `objectClass` with `top` first.
pub fn directory_entry(entry: &DirectoryEntry) -> SearchResultEntry {
    let mut result = SearchResultEntry::new(entry.dn.as_str());
    for (name, values) in entry
        .user_attributes
        .iter()
        .chain(entry.operational_attributes.iter())
    {
        result.add_attribute(name.as_str(), values.iter().map(String::as_str));
    }
    result.add_attribute(OBJECT_CLASS, entry.object_class_values());
    result
}

fn scope_label(scope: SearchScope) -> &'static str {
    match scope {
        SearchScope::BaseObject => "base",
        SearchScope::SingleLevel => "one",
        SearchScope::WholeSubtree => "sub",
    }
}

pub struct SearchHandler;

impl SearchHandler {
    async fn find_entries(
        ctx: &ConnectionContext,
        search: &SearchRequest,
    ) -> Result<Vec<DirectoryEntry>> {
        let store = ctx.store();
        match search.scope {
            SearchScope::BaseObject => store.entries_by_dn(&search.base_dn).await,
            SearchScope::SingleLevel => store.entries_by_parent(&search.base_dn).await,
            SearchScope::WholeSubtree => store.entry_tree_by_parent(&search.base_dn).await,
        }
    }
}

#[async_trait]
impl OperationHandler for SearchHandler {
    async fn handle(
        &self,
        ctx: &ConnectionContext,
        message_id: i64,
        request: &Packet,
    ) -> Result<HandlerResponse> {
        let search = SearchRequest::decode(request)?;
        let selection = select_attributes(&search.attributes);
        debug!(
            peer = %ctx.peer,
            base = %search.base_dn,
            scope = ?search.scope,
            filter = %search.filter,
            attributes = ?selection.requested,
            "Search request"
        );

        let mut entries = Vec::new();
        let (kind, code) = if selection.subschema {
            entries.push(subschema_entry());
            ("subschema", LdapResultCode::Success)
        } else if selection.naming_contexts {
            let roots = match ctx.store().root_entries().await {
                Ok(roots) => roots,
                Err(e) => {
                    metrics::record_ldap_search("naming_contexts", LdapResultCode::Other.name());
                    return Err(e);
                }
            };
            entries.push(naming_contexts_entry(&roots));
            ("naming_contexts", LdapResultCode::Success)
        } else if search.base_dn.eq_ignore_ascii_case(SCHEMA_DN) {
            let catalog = ctx.server.schema.current();
            entries.push(schema_entry(&catalog, &selection));
            ("schema", LdapResultCode::Success)
        } else {
            let kind = scope_label(search.scope);
            let found = match Self::find_entries(ctx, &search).await {
                Ok(found) => found,
                Err(e) => {
                    error!(
                        peer = %ctx.peer,
                        base = %search.base_dn,
                        error = %e,
                        "Entry lookup failed"
                    );
                    metrics::record_ldap_search(kind, LdapResultCode::Other.name());
                    return Err(e);
                }
            };
            let code = if search.scope == SearchScope::BaseObject && found.is_empty() {
                LdapResultCode::NoSuchObject
            } else {
                LdapResultCode::Success
            };
            entries.extend(found.iter().map(directory_entry));
            (kind, code)
        };

        metrics::record_ldap_search(kind, code.name());
        debug!(
            peer = %ctx.peer,
            entries = entries.len(),
            result = code.name(),
            "Search complete"
        );

        let mut messages: Vec<Packet> = entries
            .iter()
            .map(|entry| entry.to_packet(message_id))
            .collect();
        messages.push(create_search_done_response(message_id, code));
        Ok(HandlerResponse {
            messages,
            close: false,
        })
    }
}
