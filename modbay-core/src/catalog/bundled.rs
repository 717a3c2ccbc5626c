//! Compiled-in first-party modules.
//!
//! These form the static half of the discovery surface. A studio projection
//! with the same slug overrides the bundled entry at merge time.

use serde_json::json;

use super::CatalogEntry;
use crate::schema::SettingsSchema;
use crate::store::SourceType;

/// The static bundled catalog
pub fn bundled_modules() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry {
            id: "bundled-announcement-bar".to_string(),
            module_source_id: None,
            slug: "announcement-bar".to_string(),
            name: "Announcement Bar".to_string(),
            version: "1.2.0".to_string(),
            retail_price: 0.0,
            billing_cycle: "one_time".to_string(),
            source_type: SourceType::Catalog,
            render_code: ANNOUNCEMENT_BAR_CODE.to_string(),
            styles: ".announcement-bar { padding: 8px; text-align: center; }".to_string(),
            settings_schema: announcement_bar_schema(),
            default_settings: json!({
                "message": "Welcome to our store",
                "background": "#1a1a2e"
            }),
        },
        CatalogEntry {
            id: "bundled-contact-card".to_string(),
            module_source_id: None,
            slug: "contact-card".to_string(),
            name: "Contact Card".to_string(),
            version: "1.0.3".to_string(),
            retail_price: 0.0,
            billing_cycle: "one_time".to_string(),
            source_type: SourceType::Catalog,
            render_code: CONTACT_CARD_CODE.to_string(),
            styles: ".contact-card { border: 1px solid #ddd; border-radius: 6px; padding: 12px; }"
                .to_string(),
            settings_schema: contact_card_schema(),
            default_settings: json!({
                "heading": "Get in touch",
                "email": "hello@example.com"
            }),
        },
    ]
}

const ANNOUNCEMENT_BAR_CODE: &str = r#"
const announcementBar = {
  name: "Announcement Bar",
  render(config) {
    return `<div class="announcement-bar" style="background: ${config.settings.background}">${config.settings.message}</div>`;
  }
};
export default announcementBar;
"#;

const CONTACT_CARD_CODE: &str = r#"
const contactCard = {
  name: "Contact Card",
  render(config) {
    return `<div class="contact-card"><h3>${config.settings.heading}</h3><a href="mailto:${config.settings.email}">${config.settings.email}</a></div>`;
  }
};
export default contactCard;
"#;

fn announcement_bar_schema() -> SettingsSchema {
    serde_json::from_value(json!([
        {"name": "message", "label": "Message", "type": "text", "max_length": 120},
        {"name": "background", "label": "Background", "type": "color"}
    ]))
    .unwrap_or_default()
}

fn contact_card_schema() -> SettingsSchema {
    serde_json::from_value(json!([
        {"name": "heading", "label": "Heading", "type": "text", "max_length": 60},
        {"name": "email", "label": "Email", "type": "text"}
    ]))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_slugs_are_unique() {
        let modules = bundled_modules();
        let mut slugs: Vec<_> = modules.iter().map(|m| m.slug.as_str()).collect();
        slugs.sort();
        slugs.dedup();
        assert_eq!(slugs.len(), modules.len());
    }

    #[test]
    fn bundled_entries_are_first_party_and_free() {
        for module in bundled_modules() {
            assert_eq!(module.source_type, SourceType::Catalog);
            assert_eq!(module.retail_price, 0.0);
            assert!(!module.render_code.is_empty());
        }
    }
}
