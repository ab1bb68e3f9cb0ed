//! Standard LDAPv3 schema: RFC 4512 (directory models), RFC 4517 (syntaxes
//! and matching rules), RFC 4519 (user schema) and the few RFC 4524 / DS
//! classes the seed data needs.

use super::{
    AttributeType, AttributeTypeFlags as Flags, AttributeUsage, MatchingRule, ObjectClass,
    ObjectClassKind::{Abstract, Auxiliary, Structural},
    SchemaCatalog, Syntax,
};

fn syntax_oid(n: u32) -> String {
    format!("1.3.6.1.4.1.1466.115.121.1.{}", n)
}

const DIRECTORY_STRING: u32 = 15;
const DN: u32 = 12;
const IA5_STRING: u32 = 26;
const PRINTABLE_STRING: u32 = 44;
const NUMERIC_STRING: u32 = 36;
const GENERALIZED_TIME: u32 = 24;

impl SchemaCatalog {
    /// The built-in catalog used to seed storage.
    pub fn standard() -> Self {
        Self {
            syntaxes: standard_syntaxes(),
            matching_rules: standard_matching_rules(),
            attribute_types: standard_attribute_types(),
            object_classes: standard_object_classes(),
        }
    }
}

pub fn standard_syntaxes() -> Vec<Syntax> {
    [
        (3, "Attribute Type Description"),
        (5, "Binary"),
        (6, "Bit String"),
        (7, "Boolean"),
        (8, "Certificate"),
        (9, "Certificate List"),
        (10, "Certificate Pair"),
        (11, "Country String"),
        (12, "Distinguished Name"),
        (14, "Delivery Method"),
        (15, "Directory String"),
        (16, "DIT Content Rule Description"),
        (17, "DIT Structure Rule Description"),
        (21, "Enhanced Guide"),
        (22, "Facsimile Telephone Number"),
        (23, "Fax"),
        (24, "Generalized Time"),
        (25, "Guide"),
        (26, "IA5 String"),
        (27, "Integer"),
        (28, "JPEG"),
        (30, "Matching Rule Description"),
        (31, "Matching Rule Use Description"),
        (34, "Name And Optional UID"),
        (35, "Name Form Description"),
        (36, "Numeric String"),
        (37, "Object Class Description"),
        (38, "OID"),
        (39, "Other Mailbox"),
        (40, "Octet String"),
        (41, "Postal Address"),
        (44, "Printable String"),
        (49, "Supported Algorithm"),
        (50, "Telephone Number"),
        (51, "Teletex Terminal Identifier"),
        (52, "Telex Number"),
        (53, "UTC Time"),
        (54, "LDAP Syntax Description"),
        (58, "Substring Assertion"),
    ]
    .into_iter()
    .map(|(n, description)| Syntax::new(syntax_oid(n), description))
    .collect()
}

pub fn standard_matching_rules() -> Vec<MatchingRule> {
    [
        ("2.5.13.16", "bitStringMatch", 6),
        ("2.5.13.13", "booleanMatch", 7),
        ("1.3.6.1.4.1.1466.109.114.1", "caseExactIA5Match", IA5_STRING),
        ("2.5.13.5", "caseExactMatch", DIRECTORY_STRING),
        ("2.5.13.6", "caseExactOrderingMatch", DIRECTORY_STRING),
        ("2.5.13.7", "caseExactSubstringsMatch", 58),
        ("1.3.6.1.4.1.1466.109.114.2", "caseIgnoreIA5Match", IA5_STRING),
        ("1.3.6.1.4.1.1466.109.114.3", "caseIgnoreIA5SubstringsMatch", 58),
        ("2.5.13.11", "caseIgnoreListMatch", 41),
        ("2.5.13.12", "caseIgnoreListSubstringsMatch", 58),
        ("2.5.13.2", "caseIgnoreMatch", DIRECTORY_STRING),
        ("2.5.13.3", "caseIgnoreOrderingMatch", DIRECTORY_STRING),
        ("2.5.13.4", "caseIgnoreSubstringsMatch", 58),
        ("2.5.13.31", "directoryStringFirstComponentMatch", DIRECTORY_STRING),
        ("2.5.13.1", "distinguishedNameMatch", DN),
        ("2.5.13.27", "generalizedTimeMatch", GENERALIZED_TIME),
        ("2.5.13.28", "generalizedTimeOrderingMatch", GENERALIZED_TIME),
        ("2.5.13.29", "integerFirstComponentMatch", 27),
        ("2.5.13.14", "integerMatch", 27),
        ("2.5.13.15", "integerOrderingMatch", 27),
        ("2.5.13.33", "keywordMatch", DIRECTORY_STRING),
        ("2.5.13.8", "numericStringMatch", NUMERIC_STRING),
        ("2.5.13.9", "numericStringOrderingMatch", NUMERIC_STRING),
        ("2.5.13.10", "numericStringSubstringsMatch", 58),
        ("2.5.13.30", "objectIdentifierFirstComponentMatch", 38),
        ("2.5.13.0", "objectIdentifierMatch", 38),
        ("2.5.13.17", "octetStringMatch", 40),
        ("2.5.13.18", "octetStringOrderingMatch", 40),
        ("2.5.13.20", "telephoneNumberMatch", 50),
        ("2.5.13.21", "telephoneNumberSubstringsMatch", 58),
        ("2.5.13.23", "uniqueMemberMatch", 34),
        ("2.5.13.32", "wordMatch", DIRECTORY_STRING),
    ]
    .into_iter()
    .map(|(oid, name, syntax)| MatchingRule::new(oid, name, syntax_oid(syntax)))
    .collect()
}

/// A directory-string attribute with case-ignore equality and substrings.
fn case_ignore(oid: &str, name: &str) -> AttributeType {
    AttributeType::new(oid, name)
        .equality("caseIgnoreMatch")
        .substring("caseIgnoreSubstringsMatch")
        .syntax(syntax_oid(DIRECTORY_STRING))
}

fn dn_valued(oid: &str, name: &str) -> AttributeType {
    AttributeType::new(oid, name).sup("distinguishedName")
}

fn name_subtype(oid: &str, name: &str) -> AttributeType {
    AttributeType::new(oid, name).sup("name")
}

fn operational_time(oid: &str, name: &str) -> AttributeType {
    AttributeType::new(oid, name)
        .equality("generalizedTimeMatch")
        .ordering("generalizedTimeOrderingMatch")
        .syntax(syntax_oid(GENERALIZED_TIME))
        .flags(Flags::SINGLE_VALUE | Flags::NO_USER_MODIFICATION)
        .usage(AttributeUsage::DirectoryOperation)
}

fn subschema_description(oid: &str, name: &str, syntax: u32) -> AttributeType {
    AttributeType::new(oid, name)
        .equality("objectIdentifierFirstComponentMatch")
        .syntax(syntax_oid(syntax))
        .usage(AttributeUsage::DirectoryOperation)
}

pub fn standard_attribute_types() -> Vec<AttributeType> {
    vec![
        // RFC 4512 operational attributes
        AttributeType::new("2.5.4.0", "objectClass")
            .equality("objectIdentifierMatch")
            .syntax(syntax_oid(38)),
        AttributeType::new("2.5.4.1", "aliasedObjectName")
            .equality("distinguishedNameMatch")
            .syntax(syntax_oid(DN))
            .flags(Flags::SINGLE_VALUE),
        operational_time("2.5.18.1", "createTimestamp"),
        operational_time("2.5.18.2", "modifyTimestamp"),
        AttributeType::new("2.5.18.10", "subschemaSubentry")
            .equality("distinguishedNameMatch")
            .syntax(syntax_oid(DN))
            .flags(Flags::SINGLE_VALUE | Flags::NO_USER_MODIFICATION)
            .usage(AttributeUsage::DirectoryOperation),
        AttributeType::new("1.3.6.1.4.1.1466.101.120.5", "namingContexts")
            .syntax(syntax_oid(DN))
            .usage(AttributeUsage::DsaOperation),
        subschema_description("1.3.6.1.4.1.1466.101.120.16", "ldapSyntaxes", 54),
        subschema_description("2.5.21.4", "matchingRules", 30),
        subschema_description("2.5.21.5", "attributeTypes", 3),
        subschema_description("2.5.21.6", "objectClasses", 37),
        // RFC 4519 user attributes
        case_ignore("2.5.4.15", "businessCategory"),
        case_ignore("2.5.4.41", "name"),
        name_subtype("2.5.4.6", "c")
            .alias("countryName")
            .syntax(syntax_oid(11))
            .flags(Flags::SINGLE_VALUE),
        name_subtype("2.5.4.3", "cn").alias("commonName"),
        AttributeType::new("0.9.2342.19200300.100.1.25", "dc")
            .alias("domainComponent")
            .equality("caseIgnoreIA5Match")
            .substring("caseIgnoreIA5SubstringsMatch")
            .syntax(syntax_oid(IA5_STRING))
            .flags(Flags::SINGLE_VALUE),
        case_ignore("2.5.4.13", "description"),
        case_ignore("2.5.4.27", "destinationIndicator").syntax(syntax_oid(PRINTABLE_STRING)),
        AttributeType::new("2.5.4.49", "distinguishedName")
            .equality("distinguishedNameMatch")
            .syntax(syntax_oid(DN)),
        AttributeType::new("2.5.4.46", "dnQualifier")
            .equality("caseIgnoreMatch")
            .substring("caseIgnoreSubstringsMatch")
            .ordering("caseIgnoreOrderingMatch")
            .syntax(syntax_oid(PRINTABLE_STRING)),
        AttributeType::new("2.5.4.47", "enhancedSearchGuide").syntax(syntax_oid(21)),
        AttributeType::new("2.5.4.23", "facsimileTelephoneNumber").syntax(syntax_oid(22)),
        name_subtype("2.5.4.44", "generationQualifier"),
        name_subtype("2.5.4.42", "givenName"),
        case_ignore("2.5.4.51", "houseIdentifier"),
        name_subtype("2.5.4.43", "initials"),
        AttributeType::new("2.5.4.25", "internationalISDNNumber")
            .equality("numericStringMatch")
            .substring("numericStringSubstringsMatch")
            .syntax(syntax_oid(NUMERIC_STRING)),
        name_subtype("2.5.4.7", "l").alias("localityName"),
        dn_valued("2.5.4.31", "member"),
        name_subtype("2.5.4.10", "o").alias("organizationName"),
        name_subtype("2.5.4.11", "ou").alias("organizationalUnitName"),
        dn_valued("2.5.4.32", "owner"),
        case_ignore("2.5.4.19", "physicalDeliveryOfficeName"),
        AttributeType::new("2.5.4.16", "postalAddress")
            .equality("caseIgnoreListMatch")
            .substring("caseIgnoreListSubstringsMatch")
            .syntax(syntax_oid(41)),
        case_ignore("2.5.4.17", "postalCode"),
        case_ignore("2.5.4.18", "postOfficeBox"),
        AttributeType::new("2.5.4.28", "preferredDeliveryMethod")
            .syntax(syntax_oid(14))
            .flags(Flags::SINGLE_VALUE),
        AttributeType::new("2.5.4.26", "registeredAddress")
            .sup("postalAddress")
            .syntax(syntax_oid(41)),
        dn_valued("2.5.4.33", "roleOccupant"),
        AttributeType::new("2.5.4.14", "searchGuide").syntax(syntax_oid(25)),
        dn_valued("2.5.4.34", "seeAlso"),
        case_ignore("2.5.4.5", "serialNumber").syntax(syntax_oid(PRINTABLE_STRING)),
        name_subtype("2.5.4.4", "sn").alias("surname"),
        name_subtype("2.5.4.8", "st").alias("stateOrProvinceName"),
        case_ignore("2.5.4.9", "street").alias("streetAddress"),
        AttributeType::new("2.5.4.20", "telephoneNumber")
            .equality("telephoneNumberMatch")
            .substring("telephoneNumberSubstringsMatch")
            .syntax(syntax_oid(50)),
        AttributeType::new("2.5.4.22", "teletexTerminalIdentifier").syntax(syntax_oid(51)),
        AttributeType::new("2.5.4.21", "telexNumber").syntax(syntax_oid(52)),
        name_subtype("2.5.4.12", "title"),
        case_ignore("0.9.2342.19200300.100.1.1", "uid").alias("userid"),
        AttributeType::new("2.5.4.50", "uniqueMember")
            .equality("uniqueMemberMatch")
            .syntax(syntax_oid(34)),
        AttributeType::new("2.5.4.35", "userPassword")
            .equality("octetStringMatch")
            .syntax(syntax_oid(40)),
        AttributeType::new("2.5.4.24", "x121Address")
            .equality("numericStringMatch")
            .substring("numericStringSubstringsMatch")
            .syntax(syntax_oid(NUMERIC_STRING)),
        AttributeType::new("2.5.4.45", "x500UniqueIdentifier")
            .equality("bitStringMatch")
            .syntax(syntax_oid(6)),
    ]
}

/// Telecommunication and postal attributes shared by several RFC 4519 classes.
const POSTAL_MAY: [&str; 15] = [
    "x121Address",
    "registeredAddress",
    "destinationIndicator",
    "preferredDeliveryMethod",
    "telexNumber",
    "teletexTerminalIdentifier",
    "telephoneNumber",
    "internationalISDNNumber",
    "facsimileTelephoneNumber",
    "street",
    "postOfficeBox",
    "postalCode",
    "postalAddress",
    "physicalDeliveryOfficeName",
    "st",
];

const GROUP_MAY: [&str; 6] = [
    "businessCategory",
    "seeAlso",
    "owner",
    "ou",
    "o",
    "description",
];

pub fn standard_object_classes() -> Vec<ObjectClass> {
    vec![
        // RFC 4512
        ObjectClass::new("2.5.6.0", "top", Abstract).must(["objectClass"]),
        ObjectClass::new("2.5.6.1", "alias", Structural).must(["aliasedObjectName"]),
        ObjectClass::new("2.5.20.1", "subschema", Auxiliary).may([
            "ldapSyntaxes",
            "objectClasses",
            "attributeTypes",
            "matchingRules",
        ]),
        ObjectClass::new("1.3.6.1.4.1.1466.101.120.111", "extensibleObject", Auxiliary),
        ObjectClass::new("2.16.840.1.113719.2.142.6.1.1", "ldapSubentry", Structural)
            .may(["cn"]),
        // RFC 4519
        ObjectClass::new("2.5.6.11", "applicationProcess", Structural)
            .must(["cn"])
            .may(["seeAlso", "ou", "l", "description"]),
        ObjectClass::new("2.5.6.2", "country", Structural)
            .must(["c"])
            .may(["searchGuide", "description"]),
        ObjectClass::new("1.3.6.1.4.1.1466.344", "dcObject", Auxiliary).must(["dc"]),
        ObjectClass::new("2.5.6.14", "device", Structural)
            .must(["cn"])
            .may(["serialNumber", "seeAlso", "owner", "ou", "o", "l", "description"]),
        ObjectClass::new("2.5.6.9", "groupOfNames", Structural)
            .must(["member", "cn"])
            .may(GROUP_MAY),
        ObjectClass::new("2.5.6.17", "groupOfUniqueNames", Structural)
            .must(["uniqueMember", "cn"])
            .may(GROUP_MAY),
        ObjectClass::new("2.5.6.3", "locality", Structural).may([
            "street",
            "seeAlso",
            "searchGuide",
            "st",
            "l",
            "description",
        ]),
        ObjectClass::new("2.5.6.4", "organization", Structural)
            .must(["o"])
            .may(["userPassword", "searchGuide", "seeAlso", "businessCategory"])
            .may(POSTAL_MAY)
            .may(["l", "description"]),
        ObjectClass::new("2.5.6.7", "organizationalPerson", Structural)
            .sup("person")
            .may(["title"])
            .may(POSTAL_MAY)
            .may(["ou", "l"]),
        ObjectClass::new("2.5.6.8", "organizationalRole", Structural)
            .must(["cn"])
            .may(["seeAlso", "roleOccupant"])
            .may(POSTAL_MAY)
            .may(["ou", "l", "description"]),
        ObjectClass::new("2.5.6.5", "organizationalUnit", Structural)
            .must(["ou"])
            .may(["businessCategory", "description", "searchGuide", "seeAlso", "userPassword"])
            .may(POSTAL_MAY)
            .may(["l"]),
        ObjectClass::new("2.5.6.6", "person", Structural)
            .must(["sn", "cn"])
            .may(["userPassword", "telephoneNumber", "seeAlso", "description"]),
        ObjectClass::new("2.5.6.10", "residentialPerson", Structural)
            .sup("person")
            .must(["l"])
            .may(["businessCategory"])
            .may(POSTAL_MAY),
        ObjectClass::new("1.3.6.1.1.3.1", "uidObject", Auxiliary).must(["uid"]),
        // RFC 4524
        ObjectClass::new("0.9.2342.19200300.100.4.13", "domain", Structural)
            .must(["dc"])
            .may(["userPassword", "searchGuide", "seeAlso", "businessCategory"])
            .may(POSTAL_MAY)
            .may(["l", "description", "o"]),
    ]
}
