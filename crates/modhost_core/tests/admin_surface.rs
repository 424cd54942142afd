use modhost_core::db::open_db_in_memory;
use modhost_core::{
    AdminCaller, AdminErrorCode, AdminSurface, HostRuntime, ModuleDescriptor, ModuleLifecycle,
    ModuleManager, ModuleRegistry, SelfTestRegistry, SettingsStore, SqliteModuleStore,
    UnitCatalog, UnitContext, UnitError,
};
use rusqlite::Connection;
use serde_json::json;

fn units() -> UnitCatalog {
    let mut catalog = UnitCatalog::new();
    catalog.register("hours.core", |ctx: &mut UnitContext<'_>| {
        ctx.provide("hours.schedule")
    });
    catalog.register("roles.core", |ctx: &mut UnitContext<'_>| {
        ctx.provide("roles.assign")
    });
    catalog.register(
        "broken.core",
        |_ctx: &mut UnitContext<'_>| -> Result<(), UnitError> { panic!("broken unit exploded") },
    );
    catalog
}

fn surface(conn: &Connection, caller: AdminCaller) -> AdminSurface<SqliteModuleStore<'_>> {
    let registry = ModuleRegistry::new(vec![
        ModuleDescriptor::new("hours", "Opening Hours")
            .in_category("content")
            .with_units(["hours.core"]),
        ModuleDescriptor::new("roles", "Staff Roles")
            .in_category("people")
            .depends_on(["hours"])
            .with_units(["roles.core"])
            .with_admin_page(),
        ModuleDescriptor::new("broken", "Broken").with_units(["broken.core"]),
        ModuleDescriptor::new("sync", "Directory Sync")
            .requires_plugin("directory")
            .with_security_warning("Pushes data to the external directory."),
    ])
    .expect("registry should validate");
    let store = SqliteModuleStore::try_new(conn).expect("store init");
    let manager = ModuleManager::new(registry, store, units(), SelfTestRegistry::new())
        .with_runtime(HostRuntime::new());
    AdminSurface::new(manager, caller)
}

#[test]
fn unprivileged_mutations_are_denied_without_side_effects() {
    let conn = open_db_in_memory().expect("open db");
    let mut admin = surface(&conn, AdminCaller::unprivileged());

    let toggle = admin.toggle("hours", true);
    assert!(!toggle.ok);
    assert_eq!(toggle.code, Some(AdminErrorCode::PermissionDenied));
    assert!(toggle.data.is_none());

    let clear = admin.clear_error("hours");
    assert_eq!(clear.code, Some(AdminErrorCode::PermissionDenied));

    let self_tests = admin.run_self_tests();
    assert_eq!(self_tests.code, Some(AdminErrorCode::PermissionDenied));

    let store = SqliteModuleStore::try_new(&conn).expect("store init");
    assert!(!store.is_enabled("hours").expect("read flag"));
    assert_eq!(admin.manager().lifecycle("hours"), ModuleLifecycle::Unloaded);
}

#[test]
fn unprivileged_callers_can_still_read() {
    let conn = open_db_in_memory().expect("open db");
    let admin = surface(&conn, AdminCaller::unprivileged());

    assert!(admin.list_modules().ok);
    assert!(admin.list_errors().ok);
}

#[test]
fn listing_reports_metadata_and_state_grouped_by_category() {
    let conn = open_db_in_memory().expect("open db");
    let mut admin = surface(&conn, AdminCaller::privileged());
    assert!(admin.toggle("hours", true).ok);

    let response = admin.list_modules();

    assert!(response.ok);
    let listings = response.data.expect("listing data");
    let ids: Vec<&str> = listings.iter().map(|listing| listing.id.as_str()).collect();
    assert_eq!(ids, vec!["hours", "broken", "sync", "roles"]);
    let hours = &listings[0];
    assert_eq!(hours.category, "content");
    assert_eq!(hours.id, "hours");
    assert!(hours.enabled);
    assert!(hours.loaded);
    assert_eq!(hours.lifecycle, ModuleLifecycle::Loaded);
    assert_eq!(hours.dependents, vec!["roles"]);

    let roles = &listings[3];
    assert_eq!(roles.category, "people");
    assert_eq!(roles.dependencies, vec!["hours"]);
    assert!(roles.has_admin_page);
    assert!(!roles.enabled);

    let sync = &listings[2];
    assert_eq!(sync.category, "general");
    assert_eq!(sync.required_plugin.as_deref(), Some("directory"));
    assert_eq!(sync.required_plugin_active, Some(false));
    assert!(sync.security_warning.is_some());
}

#[test]
fn toggle_maps_manager_failures_to_codes() {
    let conn = open_db_in_memory().expect("open db");
    let mut admin = surface(&conn, AdminCaller::privileged());

    let missing_dependency = admin.toggle("roles", true);
    assert_eq!(
        missing_dependency.code,
        Some(AdminErrorCode::DependencyDisabled)
    );

    let inactive_plugin = admin.toggle("sync", true);
    assert_eq!(
        inactive_plugin.code,
        Some(AdminErrorCode::RequiredPluginInactive)
    );

    let unknown = admin.toggle("nope", true);
    assert_eq!(unknown.code, Some(AdminErrorCode::NotFound));

    assert!(admin.toggle("hours", true).ok);
    assert!(admin.toggle("roles", true).ok);
    let blocked = admin.toggle("hours", false);
    assert_eq!(blocked.code, Some(AdminErrorCode::DependencyBlocked));
    assert!(blocked.message.contains("roles"));
}

#[test]
fn failed_enable_returns_load_failed_with_disabled_state() {
    let conn = open_db_in_memory().expect("open db");
    let mut admin = surface(&conn, AdminCaller::privileged());

    let response = admin.toggle("broken", true);

    assert!(!response.ok);
    assert_eq!(response.code, Some(AdminErrorCode::LoadFailed));
    assert_eq!(response.data, Some(ModuleLifecycle::Disabled));
    assert!(response.message.contains("broken unit exploded"));

    let errors = admin.list_errors().data.expect("error data");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].module_id, "broken");
}

#[test]
fn clear_error_is_not_found_when_nothing_was_recorded() {
    let conn = open_db_in_memory().expect("open db");
    let mut admin = surface(&conn, AdminCaller::privileged());
    admin.toggle("broken", true);

    assert!(admin.clear_error("broken").ok);
    assert!(admin.list_errors().data.expect("error data").is_empty());

    let again = admin.clear_error("broken");
    assert!(!again.ok);
    assert_eq!(again.code, Some(AdminErrorCode::NotFound));
}

#[test]
fn envelopes_serialize_with_snake_case_codes() {
    let conn = open_db_in_memory().expect("open db");
    let mut admin = surface(&conn, AdminCaller::unprivileged());

    let response = admin.toggle("hours", false);
    let value = serde_json::to_value(&response).expect("serialize envelope");

    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["code"], json!("permission_denied"));
    assert_eq!(value["data"], json!(null));
}
