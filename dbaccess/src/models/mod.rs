//! Access-management entities served by the engine
//!
//! Roles and packages are grouped by area and owned by a provider; the
//! `rolepackage` junction grants packages to roles.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SchemaConfig;
use crate::error::Result;
use crate::orm::DefinitionRegistry;
use crate::{DbEntity, DbExtended};

/// Organisation owning roles and packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, DbEntity)]
#[db_entity(table = "provider")]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    pub ref_id: Option<String>,
    pub code: Option<String>,
}

/// Thematic grouping of packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, DbEntity)]
#[db_entity(table = "area", translated)]
pub struct Area {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub urn: Option<String>,
    pub icon_url: Option<String>,
}

/// Bundle of rights that can be assigned or delegated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, DbEntity)]
#[db_entity(table = "package", translated, audited)]
pub struct Package {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub area_id: Uuid,
    pub name: String,
    pub description: String,
    pub is_assignable: bool,
    pub is_delegable: bool,
    pub has_resources: bool,
    pub urn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, DbEntity)]
#[db_entity(table = "role", translated, audited)]
pub struct Role {
    pub id: Uuid,
    pub provider_id: Option<Uuid>,
    pub name: String,
    pub code: String,
    pub description: String,
    pub urn: Option<String>,
    pub is_key_role: bool,
}

/// Grants a package to a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, DbEntity)]
#[db_entity(table = "rolepackage", audited)]
pub struct RolePackage {
    pub id: Uuid,
    pub role_id: Uuid,
    pub package_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, DbExtended)]
pub struct RoleExtended {
    #[db(base)]
    #[serde(flatten)]
    pub role: Role,
    pub provider: Option<Provider>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, DbExtended)]
pub struct PackageExtended {
    #[db(base)]
    #[serde(flatten)]
    pub package: Package,
    pub area: Area,
    pub provider: Option<Provider>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, DbExtended)]
pub struct AreaExtended {
    #[db(base)]
    #[serde(flatten)]
    pub area: Area,
    #[db(list)]
    pub packages: Vec<Package>,
}

/// Registry with every entity of this module.
pub fn registry(schemas: &SchemaConfig) -> Result<DefinitionRegistry> {
    DefinitionRegistry::builder(schemas)
        .register::<Provider>()
        .register::<Area>()
        .register::<Package>()
        .register::<Role>()
        .register::<RolePackage>()
        .build()
}
