// SPDX-License-Identifier: MIT OR Apache-2.0

//! Names of physical objects in organization databases and the statements managing them.
//!
//! Every identifier is quoted, entity set and property type names are chosen by users and can
//! contain anything.
use std::collections::BTreeSet;

use tessera_core::{Principal, PrincipalType};
use uuid::Uuid;

/// Column holding the entity key in every source table and view.
pub const ENTITY_KEY_COLUMN: &str = "entity_key_id";

/// Quotes an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes a string literal, doubling embedded single quotes.
pub fn quote_literal(literal: &str) -> String {
    format!("'{}'", literal.replace('\'', "''"))
}

fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Name of the database of an organization.
pub fn database_name(prefix: &str, organization_id: &Uuid) -> String {
    format!("{prefix}{}", organization_id.simple())
}

/// Deterministic database role name of a principal.
///
/// Ids of principals are not restricted to what a role name can hold, the name is derived from a
/// name-based uuid of the principal instead.
pub fn role_name(principal: &Principal) -> String {
    let prefix = match principal.principal_type() {
        PrincipalType::User => "user",
        PrincipalType::Role => "role",
        PrincipalType::Organization => "org",
        PrincipalType::App => "app",
    };
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, principal.to_string().as_bytes());
    format!("{prefix}_{}", id.simple())
}

/// Name of the upstream table of an entity set.
pub fn source_table(entity_set_id: &Uuid) -> String {
    format!("es_{}", entity_set_id.simple())
}

/// Name of the upstream column of a property type.
pub fn source_column(property_type_id: &Uuid) -> String {
    format!("pt_{}", property_type_id.simple())
}

/// One column of a materialized view: upstream property type and the name it is exposed as.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ViewColumn {
    pub property_type_id: Uuid,
    pub name: String,
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

pub fn create_materialized_view(
    schema: &str,
    view_name: &str,
    source_schema: &str,
    entity_set_id: &Uuid,
    columns: &[ViewColumn],
) -> String {
    let mut select = vec![quote_ident(ENTITY_KEY_COLUMN)];
    select.extend(columns.iter().map(|column| {
        format!(
            "{} AS {}",
            quote_ident(&source_column(&column.property_type_id)),
            quote_ident(&column.name)
        )
    }));

    format!(
        "CREATE MATERIALIZED VIEW IF NOT EXISTS {} AS SELECT {} FROM {}",
        qualified(schema, view_name),
        select.join(", "),
        qualified(source_schema, &source_table(entity_set_id)),
    )
}

pub fn refresh_materialized_view(schema: &str, view_name: &str) -> String {
    format!("REFRESH MATERIALIZED VIEW {}", qualified(schema, view_name))
}

pub fn rename_materialized_view(schema: &str, view_name: &str, new_name: &str) -> String {
    format!(
        "ALTER MATERIALIZED VIEW IF EXISTS {} RENAME TO {}",
        qualified(schema, view_name),
        quote_ident(new_name)
    )
}

/// Dropping a view drops all grants on it as well.
pub fn drop_materialized_view(schema: &str, view_name: &str) -> String {
    format!(
        "DROP MATERIALIZED VIEW IF EXISTS {}",
        qualified(schema, view_name)
    )
}

/// Revokes table and column privileges of a role on a view.
pub fn revoke_view(schema: &str, view_name: &str, role: &str) -> String {
    format!(
        "REVOKE ALL ON TABLE {} FROM {}",
        qualified(schema, view_name),
        quote_ident(role)
    )
}

/// Column-level SELECT grant, `None` if there is no column to grant.
pub fn grant_select(
    schema: &str,
    view_name: &str,
    columns: &BTreeSet<String>,
    role: &str,
) -> Option<String> {
    if columns.is_empty() {
        return None;
    }

    let mut quoted = vec![quote_ident(ENTITY_KEY_COLUMN)];
    quoted.extend(columns.iter().map(|column| quote_ident(column)));

    Some(format!(
        "GRANT SELECT ({}) ON TABLE {} TO {}",
        quoted.join(", "),
        qualified(schema, view_name),
        quote_ident(role)
    ))
}

/// Creates a group role which can not log in, nothing happens if it exists already.
pub fn create_group_role(role: &str) -> String {
    format!(
        "DO $$ BEGIN CREATE ROLE {} NOLOGIN; EXCEPTION WHEN duplicate_object THEN NULL; END $$",
        quote_ident(role)
    )
}

/// Creates a login role, nothing happens if it exists already.
pub fn create_login_role(role: &str, password: &str) -> String {
    format!(
        "DO $$ BEGIN CREATE ROLE {} WITH LOGIN ENCRYPTED PASSWORD {}; \
         EXCEPTION WHEN duplicate_object THEN NULL; END $$",
        quote_ident(role),
        quote_literal(password)
    )
}

pub fn alter_role_password(role: &str, password: &str) -> String {
    format!(
        "ALTER ROLE {} WITH ENCRYPTED PASSWORD {}",
        quote_ident(role),
        quote_literal(password)
    )
}

pub fn grant_role(role: &str, member: &str) -> String {
    format!("GRANT {} TO {}", quote_ident(role), quote_ident(member))
}

pub fn revoke_role(role: &str, member: &str) -> String {
    format!("REVOKE {} FROM {}", quote_ident(role), quote_ident(member))
}

pub fn grant_connect(database: &str, role: &str) -> String {
    format!(
        "GRANT CONNECT ON DATABASE {} TO {}",
        quote_ident(database),
        quote_ident(role)
    )
}

pub fn revoke_public_connect(database: &str) -> String {
    format!("REVOKE ALL ON DATABASE {} FROM PUBLIC", quote_ident(database))
}

pub fn grant_schema_usage(schema: &str, role: &str) -> String {
    format!(
        "GRANT USAGE ON SCHEMA {} TO {}",
        quote_ident(schema),
        quote_ident(role)
    )
}

pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE {}", quote_ident(database))
}

pub fn drop_database(database: &str) -> String {
    format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_ident(database))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tessera_core::Principal;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("people"), "\"people\"");
        assert_eq!(quote_ident("a\"; DROP"), "\"a\"\"; DROP\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn role_names_are_deterministic() {
        let user = Principal::user("casey");
        assert_eq!(role_name(&user), role_name(&Principal::user("casey")));
        assert_ne!(role_name(&user), role_name(&Principal::role("casey")));
        assert!(role_name(&user).starts_with("user_"));
        assert!(role_name(&Principal::organization(Uuid::new_v4())).starts_with("org_"));
    }

    #[test]
    fn view_statements() {
        let entity_set_id = Uuid::from_u128(1);
        let property_type_id = Uuid::from_u128(2);
        let columns = [ViewColumn {
            property_type_id,
            name: "name".to_string(),
        }];

        assert_eq!(
            create_materialized_view(
                "materialized",
                "people",
                "upstream",
                &entity_set_id,
                &columns
            ),
            format!(
                "CREATE MATERIALIZED VIEW IF NOT EXISTS \"materialized\".\"people\" AS SELECT \
                 \"entity_key_id\", \"pt_{}\" AS \"name\" FROM \"upstream\".\"es_{}\"",
                property_type_id.simple(),
                entity_set_id.simple()
            )
        );

        assert_eq!(
            grant_select(
                "materialized",
                "people",
                &BTreeSet::from(["name".to_string()]),
                "user_1"
            ),
            Some(
                "GRANT SELECT (\"entity_key_id\", \"name\") ON TABLE \"materialized\".\"people\" \
                 TO \"user_1\""
                    .to_string()
            )
        );
        assert_eq!(
            grant_select("materialized", "people", &BTreeSet::new(), "user_1"),
            None
        );
    }
}
