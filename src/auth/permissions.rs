/*!
 * # Permissions
 *
 * Permission strings are `<area>.<capability>`. They are stored per user as a
 * JSON array and copied into the access token.
 */

/// Grants every permission.
pub const PERMISSION_ALL: &str = "all";

/// Roles that pass every permission check.
pub const ADMIN_ROLES: [&str; 2] = ["ADMIN", "MASTER_ADMIN"];

// Manufacturing
pub const MANUFACTURING_VIEW: &str = "manufacturing.view";
pub const MANUFACTURING_PRODUCTION: &str = "manufacturing.production";
pub const MANUFACTURING_BOM: &str = "manufacturing.bom";

// Inventory
pub const INVENTORY_VIEW: &str = "inventory.view";
pub const INVENTORY_MANAGE: &str = "inventory.manage";

/// Every permission a route can require, for seeding and documentation.
pub const ALL_PERMISSIONS: [&str; 5] = [
    MANUFACTURING_VIEW,
    MANUFACTURING_PRODUCTION,
    MANUFACTURING_BOM,
    INVENTORY_VIEW,
    INVENTORY_MANAGE,
];
