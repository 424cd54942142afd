//! Built-in module catalog shipped with the CLI.
//!
//! # Responsibility
//! - Declare the demo module descriptors, their implementation units and
//!   self-test expectations.

use modhost_core::{
    DeferredCheck, ImmediateCheck, ModuleDescriptor, ModuleRegistry, RegistryError,
    SelfTestRegistry, UnitCatalog, UnitContext, UnitError,
};

/// Host plugin the `role_sync` module needs.
pub const DIRECTORY_PLUGIN: &str = "directory";

pub fn descriptors() -> Vec<ModuleDescriptor> {
    vec![
        ModuleDescriptor::new("hours", "Opening Hours")
            .with_description("Weekly opening hours with a summary widget.")
            .in_category("content")
            .with_units(["hours.core", "hours.widget"]),
        ModuleDescriptor::new("markers", "Map Markers")
            .with_description("Location markers rendered on embedded maps.")
            .in_category("content")
            .with_units(["markers.core"]),
        ModuleDescriptor::new("roles", "Staff Roles")
            .with_description("Assigns staff roles to opening-hour shifts.")
            .in_category("people")
            .depends_on(["hours"])
            .with_units(["roles.core"])
            .with_admin_page(),
        ModuleDescriptor::new("role_sync", "Role Sync")
            .with_description("Mirrors staff roles into the external directory.")
            .in_category("people")
            .depends_on(["roles"])
            .with_units(["role_sync.core"])
            .requires_plugin(DIRECTORY_PLUGIN)
            .with_security_warning("Writes role membership to the external directory."),
        ModuleDescriptor::new("dashboard", "Dashboard")
            .with_description("Operator dashboard summarizing module health.")
            .in_category("admin")
            .with_units(["dashboard.core"])
            .with_admin_page(),
    ]
}

pub fn registry() -> Result<ModuleRegistry, RegistryError> {
    ModuleRegistry::new(descriptors())
}

pub fn units() -> UnitCatalog {
    let mut catalog = UnitCatalog::new();
    catalog.register("hours.core", |ctx: &mut UnitContext<'_>| ctx.provide("hours.schedule"));
    catalog.register("hours.widget", |ctx: &mut UnitContext<'_>| {
        if !ctx.has_symbol("hours.schedule") {
            return Err(UnitError::new("hours.schedule must load before the widget"));
        }
        ctx.provide("hours.widget")
    });
    catalog.register("markers.core", |ctx: &mut UnitContext<'_>| ctx.provide("markers.layer"));
    catalog.register("roles.core", |ctx: &mut UnitContext<'_>| -> Result<(), UnitError> {
        ctx.provide("roles.assign")?;
        ctx.provide("roles.admin_page")
    });
    catalog.register("role_sync.core", |ctx: &mut UnitContext<'_>| {
        ctx.provide("role_sync.push")
    });
    catalog.register("dashboard.core", |ctx: &mut UnitContext<'_>| -> Result<(), UnitError> {
        ctx.provide("dashboard.panel")?;
        ctx.register_self_test(|deep| {
            match deep.schema.table_exists("module_errors") {
                Ok(true) => Ok(()),
                Ok(false) => Err("module_errors table is missing".to_string()),
                Err(err) => Err(err.to_string()),
            }
        });
        Ok(())
    });
    catalog
}

pub fn self_tests() -> SelfTestRegistry {
    let mut tests = SelfTestRegistry::new();
    tests.expect_immediate("hours", ImmediateCheck::symbol("hours.widget"));
    tests.expect_immediate("markers", ImmediateCheck::symbol("markers.layer"));
    tests.expect_immediate("roles", ImmediateCheck::symbol("roles.assign"));
    tests.expect_deferred("roles", DeferredCheck::symbol("hours.schedule"));
    tests.expect_immediate("role_sync", ImmediateCheck::symbol("role_sync.push"));
    tests.expect_deferred("dashboard", DeferredCheck::table("module_options"));
    tests
}
