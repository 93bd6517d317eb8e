//! Integration tests against a live PostgreSQL
//!
//! Each test starts a disposable PostgreSQL container (Docker required), or
//! uses `DBACCESS_TEST_DATABASE_URL` when set. Every test works in its own
//! freshly created schemas and drops them afterwards.

use std::collections::HashSet;
use std::time::Duration;

use pretty_assertions::assert_eq;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

use dbaccess::audit::AuditContext;
use dbaccess::config::SchemaConfig;
use dbaccess::db::Database;
use dbaccess::models::{
    Area, AreaExtended, Package, PackageExtended, Provider, Role, RoleExtended, RolePackage,
};
use dbaccess::orm::{DbEntity, DefinitionRegistry, FilterBuilder, GenericFilter, Join, RequestOptions};

/// Area label stored under a column name that differs from the field.
#[derive(Debug, Clone, PartialEq, dbaccess::DbEntity)]
#[db_entity(table = "tag")]
struct Tag {
    id: Uuid,
    area_id: Uuid,
    #[db(rename = "label")]
    title: String,
    #[db(skip)]
    cached: String,
}

#[derive(Debug, dbaccess::DbExtended)]
struct AreaTags {
    #[db(base)]
    area: Area,
    #[db(list)]
    tags: Vec<Tag>,
}

struct TestDb {
    db: Database,
    schemas: SchemaConfig,
    context: AuditContext,
    _container: Option<ContainerAsync<Postgres>>,
}

impl TestDb {
    /// Connect and create isolated schemas.
    async fn setup() -> Self {
        let (url, container) = match std::env::var("DBACCESS_TEST_DATABASE_URL") {
            Ok(url) => (url, None),
            Err(_) => {
                // MERGE needs PostgreSQL 15 or newer
                let container = Postgres::default()
                    .with_tag("16-alpine")
                    .start()
                    .await
                    .expect("start PostgreSQL container (is Docker running?)");
                let host = container.get_host().await.unwrap();
                let port = container.get_host_port_ipv4(5432).await.unwrap();
                (
                    format!("postgres://postgres:postgres@{}:{}/postgres", host, port),
                    Some(container),
                )
            }
        };

        let suffix = Uuid::new_v4().simple().to_string()[..12].to_string();
        let schemas = SchemaConfig {
            base_schema: format!("dbt_{}", suffix),
            translation_schema: format!("dbt_{}_tr", suffix),
        };
        let registry = DefinitionRegistry::builder(&schemas)
            .register::<Provider>()
            .register::<Area>()
            .register::<Package>()
            .register::<Role>()
            .register::<RolePackage>()
            .register::<Tag>()
            .build()
            .unwrap();
        let db = Database::connect_with_retry(&url, registry, Duration::from_millis(500)).await;

        let test = Self {
            db,
            schemas,
            context: AuditContext::new(Uuid::new_v4(), Uuid::new_v4()),
            _container: container,
        };
        test.create_schema().await;
        test
    }

    fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    async fn create_schema(&self) {
        let ddl = format!(
            "CREATE SCHEMA {}; CREATE SCHEMA {};",
            self.schemas.base_schema, self.schemas.translation_schema
        );
        sqlx::raw_sql(&ddl).execute(self.pool()).await.unwrap();

        self.create_table::<Provider>().await;
        self.create_table::<Area>().await;
        self.create_table::<Package>().await;
        self.create_table::<Role>().await;
        self.create_table::<RolePackage>().await;
        self.create_table::<Tag>().await;

        let installer = self.db.audit_installer(self.context.clone());
        for descriptor in self.db.registry().descriptors() {
            if descriptor.is_audited() {
                installer.install(&descriptor).await.unwrap();
            }
        }
    }

    async fn create_table<T: DbEntity>(&self) {
        let columns: Vec<String> = T::columns().iter().map(|c| c.to_sql()).collect();
        let mut ddl = format!(
            "CREATE TABLE {}.{} ({});",
            self.schemas.base_schema,
            T::TABLE,
            columns.join(", ")
        );

        if T::TRANSLATED {
            let mut translated = vec![
                format!("{} uuid NOT NULL", T::PRIMARY_KEY),
                "language text NOT NULL".to_string(),
            ];
            translated.extend(
                T::columns()
                    .iter()
                    .filter(|c| !c.is_primary_key && c.kind.is_text())
                    .map(|c| format!("{} text", c.name)),
            );
            translated.push(format!("PRIMARY KEY ({}, language)", T::PRIMARY_KEY));
            ddl.push_str(&format!(
                "CREATE TABLE {}.{} ({});",
                self.schemas.translation_schema,
                T::TABLE,
                translated.join(", ")
            ));
        }

        sqlx::raw_sql(&ddl).execute(self.pool()).await.unwrap();
    }

    async fn teardown(self) {
        let base = &self.schemas.base_schema;
        let translation = &self.schemas.translation_schema;
        let ddl = format!(
            "DROP SCHEMA IF EXISTS {base} CASCADE; DROP SCHEMA IF EXISTS {base}_history CASCADE; \
             DROP SCHEMA IF EXISTS {translation} CASCADE; DROP SCHEMA IF EXISTS {translation}_history CASCADE;"
        );
        sqlx::raw_sql(&ddl).execute(self.pool()).await.unwrap();
    }
}

fn provider(name: &str) -> Provider {
    Provider {
        id: Uuid::new_v4(),
        name: name.to_string(),
        ref_id: None,
        code: None,
    }
}

fn area(name: &str) -> Area {
    Area {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: format!("{} description", name),
        urn: None,
        icon_url: None,
    }
}

fn package(area: &Area, provider: &Provider, name: &str) -> Package {
    Package {
        id: Uuid::new_v4(),
        provider_id: provider.id,
        area_id: area.id,
        name: name.to_string(),
        description: format!("{} description", name),
        is_assignable: true,
        is_delegable: true,
        has_resources: false,
        urn: None,
    }
}

fn daglig_leder(provider: Option<&Provider>) -> Role {
    Role {
        id: Uuid::new_v4(),
        provider_id: provider.map(|p| p.id),
        name: "Daglig leder".to_string(),
        code: "dagl".to_string(),
        description: "Daglig leder i virksomheten".to_string(),
        urn: Some("urn:altinn:external-role:ccr:daglig-leder".to_string()),
        is_key_role: true,
    }
}

#[tokio::test]
async fn test_role_lookup_by_code() {
    let test = TestDb::setup().await;
    let roles = test.db.basic::<Role>().unwrap();
    let role = daglig_leder(None);
    assert_eq!(roles.create(&role, &test.context).await.unwrap(), 1);

    let found = roles
        .get_by("code", "dagl", &RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found.first().unwrap().name, "Daglig leder");
    assert_eq!(found.page.total_items, 1);

    let missing = roles
        .get_by("code", "nope", &RequestOptions::new())
        .await
        .unwrap();
    assert!(missing.is_empty());

    test.teardown().await;
}

#[tokio::test]
async fn test_translation_fallback() {
    let test = TestDb::setup().await;
    let roles = test.db.basic::<Role>().unwrap();
    let role = daglig_leder(None);
    roles.create(&role, &test.context).await.unwrap();

    let english = Role {
        name: "Managing director".to_string(),
        ..role.clone()
    };
    roles
        .create_translation(&english, "eng", &test.context)
        .await
        .unwrap();

    let eng = roles
        .get_by_id_with(role.id, &RequestOptions::new().language("eng"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(eng.name, "Managing director");

    let nno = roles
        .get_by_id_with(role.id, &RequestOptions::new().language("nno"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(nno.name, "Daglig leder");

    let renamed = Role {
        name: "Chief executive".to_string(),
        ..english
    };
    roles
        .upsert_translation(&renamed, "eng", &test.context)
        .await
        .unwrap();
    let eng = roles
        .get_by_id_with(role.id, &RequestOptions::new().language("eng"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(eng.name, "Chief executive");

    test.teardown().await;
}

#[tokio::test]
async fn test_paging_covers_every_row_once() {
    let test = TestDb::setup().await;
    let providers = test.db.basic::<Provider>().unwrap();
    for i in 0..25 {
        providers
            .create(&provider(&format!("Provider {:02}", i)), &test.context)
            .await
            .unwrap();
    }

    let mut seen = HashSet::new();
    for page in 1..=3 {
        let options = RequestOptions::new().paged(page, 10).order_by("name");
        let result = providers.get(&[], &options).await.unwrap();
        assert_eq!(result.page.total_items, 25);
        assert_eq!(result.page.page_count, 3);
        assert_eq!(result.page.page_number, page);
        for p in result {
            assert!(seen.insert(p.id), "row returned twice");
        }
    }
    assert_eq!(seen.len(), 25);

    let past_end = providers
        .get(&[], &RequestOptions::new().paged(4, 10))
        .await
        .unwrap();
    assert!(past_end.is_empty());

    test.teardown().await;
}

#[tokio::test]
async fn test_cross_symmetry() {
    let test = TestDb::setup().await;
    let owner = provider("Digdir");
    let group = area("Skatt");
    let tax = package(&group, &owner, "Skattegrunnlag");
    let role = daglig_leder(Some(&owner));

    test.db.basic::<Provider>().unwrap().create(&owner, &test.context).await.unwrap();
    test.db.basic::<Area>().unwrap().create(&group, &test.context).await.unwrap();
    test.db.basic::<Package>().unwrap().create(&tax, &test.context).await.unwrap();
    test.db.basic::<Role>().unwrap().create(&role, &test.context).await.unwrap();

    let links = test.db.cross::<RolePackage, Role, Package>().unwrap();
    let options = RequestOptions::new();

    assert!(links.get_b(role.id, &[], &options).await.unwrap().is_empty());

    links.create_cross(role.id, tax.id, &test.context).await.unwrap();
    let packages = links.get_b(role.id, &[], &options).await.unwrap();
    assert_eq!(packages.into_items(), vec![tax.clone()]);
    let roles = links.get_a(tax.id, &[], &options).await.unwrap();
    assert_eq!(roles.first().map(|r| r.id), Some(role.id));

    assert_eq!(links.delete_cross(role.id, tax.id, &test.context).await.unwrap(), 1);
    assert!(links.get_b(role.id, &[], &options).await.unwrap().is_empty());
    assert!(links.get_a(tax.id, &[], &options).await.unwrap().is_empty());

    test.teardown().await;
}

#[tokio::test]
async fn test_extended_reads() {
    let test = TestDb::setup().await;
    let owner = provider("Digdir");
    let group = area("Skatt");
    let first = package(&group, &owner, "Skattegrunnlag");
    let second = package(&group, &owner, "Merverdiavgift");
    let with_provider = daglig_leder(Some(&owner));
    let without_provider = Role {
        id: Uuid::new_v4(),
        code: "lede".to_string(),
        name: "Styrets leder".to_string(),
        ..daglig_leder(None)
    };

    test.db.basic::<Provider>().unwrap().create(&owner, &test.context).await.unwrap();
    test.db.basic::<Area>().unwrap().create(&group, &test.context).await.unwrap();
    let packages = test.db.basic::<Package>().unwrap();
    packages.create(&first, &test.context).await.unwrap();
    packages.create(&second, &test.context).await.unwrap();
    let roles = test.db.basic::<Role>().unwrap();
    roles.create(&with_provider, &test.context).await.unwrap();
    roles.create(&without_provider, &test.context).await.unwrap();

    let extended = test
        .db
        .extended::<RoleExtended>()
        .unwrap()
        .join::<Provider>(Join::scalar("provider", "provider_id", "id").optional())
        .unwrap();

    let found = extended
        .search_extended("leder", &RequestOptions::new().order_by("code"), false)
        .await
        .unwrap()
        .into_items();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].role.code, "dagl");
    assert_eq!(found[0].provider.as_ref().map(|p| p.name.as_str()), Some("Digdir"));
    assert_eq!(found[1].provider, None);

    let prefixed = extended
        .search_extended("styr", &RequestOptions::new(), true)
        .await
        .unwrap();
    assert_eq!(prefixed.len(), 1);

    let areas = test
        .db
        .extended::<AreaExtended>()
        .unwrap()
        .join::<Package>(Join::list("packages", "id", "area_id"))
        .unwrap();
    let area = areas
        .get_extended_by_id(group.id, &RequestOptions::new())
        .await
        .unwrap()
        .unwrap();
    let mut names: Vec<_> = area.packages.iter().map(|p| p.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["Merverdiavgift", "Skattegrunnlag"]);

    test.teardown().await;
}

#[tokio::test]
async fn test_history_and_as_of() {
    let test = TestDb::setup().await;
    let roles = test.db.basic::<Role>().unwrap();
    let role = daglig_leder(None);
    roles.create(&role, &test.context).await.unwrap();

    let before_update: chrono::DateTime<chrono::Utc> = sqlx::query_scalar("SELECT now()")
        .fetch_one(test.pool())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    roles
        .update_property(role.id, "name", "Daglig leder (ny)", &test.context)
        .await
        .unwrap();

    let history = roles.get_history(role.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].entity.name, "Daglig leder");
    assert!(history[0].valid_to.is_some());
    assert_eq!(history[1].entity.name, "Daglig leder (ny)");
    assert_eq!(history[1].valid_to, None);

    let then = roles
        .get_by_id_with(role.id, &RequestOptions::new().as_of(before_update))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(then.name, "Daglig leder");

    let now = roles.get_by_id(role.id).await.unwrap().unwrap();
    assert_eq!(now.name, "Daglig leder (ny)");

    let changed_by: Option<Uuid> = sqlx::query_scalar(&format!(
        "SELECT audit_changedby FROM {}.role WHERE id = $1",
        test.schemas.base_schema
    ))
    .bind(role.id)
    .fetch_one(test.pool())
    .await
    .unwrap();
    assert_eq!(changed_by, Some(test.context.changed_by));

    test.teardown().await;
}

#[tokio::test]
async fn test_ingest_and_merge() {
    let test = TestDb::setup().await;
    let ingest = test.db.ingest();
    let batch: Vec<Provider> = (0..120).map(|i| provider(&format!("Ingested {}", i))).collect();

    let report = ingest.ingest(&batch, &test.context).await.unwrap();
    assert_eq!(report.rows_written, 120);
    assert_eq!(report.rows_skipped, 0);

    let providers = test.db.basic::<Provider>().unwrap();
    assert_eq!(providers.get_all(&RequestOptions::new()).await.unwrap().len(), 120);

    let mut changed = batch[..10].to_vec();
    for p in &mut changed {
        p.name = format!("{} (renamed)", p.name);
    }
    changed.push(provider("Brand new"));
    let report = ingest.ingest_and_merge(&changed, &[], &test.context).await.unwrap();
    assert_eq!(report.rows_written, 11);
    assert_eq!(report.rows_merged, 11);

    let renamed = providers
        .get(
            &[GenericFilter::new("name", dbaccess::orm::FilterComparer::EndsWith, "(renamed)")],
            &RequestOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(renamed.len(), 10);
    assert_eq!(providers.get_all(&RequestOptions::new()).await.unwrap().len(), 121);

    test.teardown().await;
}

#[tokio::test]
async fn test_delete_where_and_unique_violation() {
    let test = TestDb::setup().await;
    let providers = test.db.basic::<Provider>().unwrap();
    let digdir = provider("Digdir");
    providers.create(&digdir, &test.context).await.unwrap();

    let err = providers.create(&digdir, &test.context).await.unwrap_err();
    assert!(err.is_unique_violation());

    let removed = providers
        .delete_where(&[GenericFilter::equal("name", "Digdir")], &test.context)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(providers.get_by_id(digdir.id).await.unwrap().is_none());

    test.teardown().await;
}

#[tokio::test]
async fn test_paging_with_tied_order_column() {
    let test = TestDb::setup().await;
    let providers = test.db.basic::<Provider>().unwrap();
    for _ in 0..12 {
        providers.create(&provider("Same name"), &test.context).await.unwrap();
    }

    let mut seen = HashSet::new();
    for page in 1..=3 {
        let options = RequestOptions::new().paged(page, 5).order_by("name");
        for p in providers.get(&[], &options).await.unwrap() {
            assert!(seen.insert(p.id), "row returned twice");
        }
    }
    assert_eq!(seen.len(), 12);

    test.teardown().await;
}

#[tokio::test]
async fn test_optional_join_without_match_keeps_base_columns() {
    let test = TestDb::setup().await;
    let group = area("Skatt");
    let owner = provider("Digdir");
    let orphan = Package {
        provider_id: Uuid::new_v4(),
        ..package(&group, &owner, "Skattegrunnlag")
    };
    test.db.basic::<Area>().unwrap().create(&group, &test.context).await.unwrap();
    test.db.basic::<Package>().unwrap().create(&orphan, &test.context).await.unwrap();

    let packages = test
        .db
        .extended::<PackageExtended>()
        .unwrap()
        .join::<Area>(Join::scalar("area", "area_id", "id"))
        .unwrap()
        .join::<Provider>(Join::scalar("provider", "provider_id", "id").optional())
        .unwrap();

    let found = packages
        .get_extended_by_id(orphan.id, &RequestOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.package, orphan);
    assert_eq!(found.area, group);
    assert_eq!(found.provider, None);

    test.teardown().await;
}

#[tokio::test]
async fn test_pattern_filters_match_literally() {
    let test = TestDb::setup().await;
    let providers = test.db.basic::<Provider>().unwrap();
    for name in ["a_b", "axb", "100%", "1000", r"c:\dir"] {
        providers.create(&provider(name), &test.context).await.unwrap();
    }

    let names = |found: dbaccess::orm::QueryResult<Provider>| {
        let mut names: Vec<String> = found.into_iter().map(|p| p.name).collect();
        names.sort();
        names
    };

    let found = providers
        .get(&FilterBuilder::new().contains("name", "a_b").build(), &RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(names(found), ["a_b"]);

    let found = providers
        .get(&FilterBuilder::new().ends_with("name", "0%").build(), &RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(names(found), ["100%"]);

    let found = providers
        .get(&FilterBuilder::new().starts_with("name", r"C:\").build(), &RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(names(found), [r"c:\dir"]);

    test.teardown().await;
}

#[tokio::test]
async fn test_list_join_decodes_renamed_columns() {
    let test = TestDb::setup().await;
    let group = area("Skatt");
    test.db.basic::<Area>().unwrap().create(&group, &test.context).await.unwrap();
    let tags = test.db.basic::<Tag>().unwrap();
    for title in ["skatt", "mva"] {
        let tag = Tag {
            id: Uuid::new_v4(),
            area_id: group.id,
            title: title.to_string(),
            cached: String::new(),
        };
        tags.create(&tag, &test.context).await.unwrap();
    }

    let areas = test
        .db
        .extended::<AreaTags>()
        .unwrap()
        .join::<Tag>(Join::list("tags", "id", "area_id"))
        .unwrap();
    let found = areas
        .get_extended_by_id(group.id, &RequestOptions::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.area, group);
    let mut titles: Vec<_> = found.tags.iter().map(|t| t.title.as_str()).collect();
    titles.sort_unstable();
    assert_eq!(titles, ["mva", "skatt"]);
    assert!(found.tags.iter().all(|t| t.cached.is_empty() && t.area_id == group.id));

    test.teardown().await;
}
