//! Agent capability flags and the named presets new agents start from.
//!
//! Presets are immutable templates. Assigning one copies its flags into the
//! agent record, after which the copy may be edited per agent without
//! touching the template.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionSet {
    pub view_leads: bool,
    pub create_leads: bool,
    pub edit_leads: bool,
    pub delete_leads: bool,
    pub assign_leads: bool,
    pub export_leads: bool,
    pub import_leads: bool,
    pub view_all_leads: bool,
    pub add_notes: bool,
    pub edit_notes: bool,
    pub delete_notes: bool,
    pub send_messages: bool,
    pub send_bulk_messages: bool,
    pub send_email: bool,
    pub use_whatsapp: bool,
    pub view_templates: bool,
    pub manage_templates: bool,
    pub view_follow_ups: bool,
    pub manage_follow_ups: bool,
    pub view_reports: bool,
    pub export_reports: bool,
    pub view_analytics: bool,
    pub access_settings: bool,
    pub manage_integrations: bool,
    pub manage_sheet_sync: bool,
    pub access_billing: bool,
    pub manage_team: bool,
    pub manage_roles: bool,
}

pub const FLAG_COUNT: usize = 28;

impl PermissionSet {
    pub const NONE: Self = Self {
        view_leads: false,
        create_leads: false,
        edit_leads: false,
        delete_leads: false,
        assign_leads: false,
        export_leads: false,
        import_leads: false,
        view_all_leads: false,
        add_notes: false,
        edit_notes: false,
        delete_notes: false,
        send_messages: false,
        send_bulk_messages: false,
        send_email: false,
        use_whatsapp: false,
        view_templates: false,
        manage_templates: false,
        view_follow_ups: false,
        manage_follow_ups: false,
        view_reports: false,
        export_reports: false,
        view_analytics: false,
        access_settings: false,
        manage_integrations: false,
        manage_sheet_sync: false,
        access_billing: false,
        manage_team: false,
        manage_roles: false,
    };

    pub const ALL: Self = Self {
        view_leads: true,
        create_leads: true,
        edit_leads: true,
        delete_leads: true,
        assign_leads: true,
        export_leads: true,
        import_leads: true,
        view_all_leads: true,
        add_notes: true,
        edit_notes: true,
        delete_notes: true,
        send_messages: true,
        send_bulk_messages: true,
        send_email: true,
        use_whatsapp: true,
        view_templates: true,
        manage_templates: true,
        view_follow_ups: true,
        manage_follow_ups: true,
        view_reports: true,
        export_reports: true,
        view_analytics: true,
        access_settings: true,
        manage_integrations: true,
        manage_sheet_sync: true,
        access_billing: true,
        manage_team: true,
        manage_roles: true,
    };

    /// Every flag with its wire name, in declaration order.
    pub fn flags(&self) -> [(&'static str, bool); FLAG_COUNT] {
        [
            ("viewLeads", self.view_leads),
            ("createLeads", self.create_leads),
            ("editLeads", self.edit_leads),
            ("deleteLeads", self.delete_leads),
            ("assignLeads", self.assign_leads),
            ("exportLeads", self.export_leads),
            ("importLeads", self.import_leads),
            ("viewAllLeads", self.view_all_leads),
            ("addNotes", self.add_notes),
            ("editNotes", self.edit_notes),
            ("deleteNotes", self.delete_notes),
            ("sendMessages", self.send_messages),
            ("sendBulkMessages", self.send_bulk_messages),
            ("sendEmail", self.send_email),
            ("useWhatsapp", self.use_whatsapp),
            ("viewTemplates", self.view_templates),
            ("manageTemplates", self.manage_templates),
            ("viewFollowUps", self.view_follow_ups),
            ("manageFollowUps", self.manage_follow_ups),
            ("viewReports", self.view_reports),
            ("exportReports", self.export_reports),
            ("viewAnalytics", self.view_analytics),
            ("accessSettings", self.access_settings),
            ("manageIntegrations", self.manage_integrations),
            ("manageSheetSync", self.manage_sheet_sync),
            ("accessBilling", self.access_billing),
            ("manageTeam", self.manage_team),
            ("manageRoles", self.manage_roles),
        ]
    }

    pub fn granted(&self) -> Vec<&'static str> {
        self.flags()
            .into_iter()
            .filter(|(_, enabled)| *enabled)
            .map(|(name, _)| name)
            .collect()
    }

    /// True when any create, edit, delete, assign, import or management flag is set.
    pub fn can_mutate(&self) -> bool {
        self.create_leads
            || self.edit_leads
            || self.delete_leads
            || self.assign_leads
            || self.import_leads
            || self.edit_notes
            || self.delete_notes
            || self.add_notes
            || self.manage_templates
            || self.manage_follow_ups
            || self.manage_integrations
            || self.manage_sheet_sync
            || self.manage_team
            || self.manage_roles
    }
}

const VIEW_ONLY: PermissionSet = PermissionSet {
    view_leads: true,
    view_templates: true,
    view_follow_ups: true,
    view_reports: true,
    view_analytics: true,
    ..PermissionSet::NONE
};

const BASIC_AGENT: PermissionSet = PermissionSet {
    view_leads: true,
    create_leads: true,
    edit_leads: true,
    add_notes: true,
    edit_notes: true,
    send_messages: true,
    send_email: true,
    use_whatsapp: true,
    view_templates: true,
    view_follow_ups: true,
    manage_follow_ups: true,
    view_reports: true,
    view_analytics: true,
    ..PermissionSet::NONE
};

const SENIOR_AGENT: PermissionSet = PermissionSet {
    assign_leads: true,
    export_leads: true,
    import_leads: true,
    view_all_leads: true,
    delete_notes: true,
    send_bulk_messages: true,
    manage_templates: true,
    export_reports: true,
    manage_sheet_sync: true,
    ..BASIC_AGENT
};

const MANAGER: PermissionSet = PermissionSet {
    access_billing: false,
    ..PermissionSet::ALL
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionPreset {
    ViewOnly,
    BasicAgent,
    SeniorAgent,
    Manager,
}

impl PermissionPreset {
    pub const ALL: [Self; 4] = [
        Self::ViewOnly,
        Self::BasicAgent,
        Self::SeniorAgent,
        Self::Manager,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ViewOnly => "VIEW_ONLY",
            Self::BasicAgent => "BASIC_AGENT",
            Self::SeniorAgent => "SENIOR_AGENT",
            Self::Manager => "MANAGER",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ViewOnly => "View Only",
            Self::BasicAgent => "Basic Agent",
            Self::SeniorAgent => "Senior Agent",
            Self::Manager => "Manager",
        }
    }

    /// Accepts `VIEW_ONLY`, `view-only` and `view_only` spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|preset| preset.as_str() == normalized)
    }

    /// Returns a fresh copy of the template flags.
    pub fn permissions(self) -> PermissionSet {
        match self {
            Self::ViewOnly => VIEW_ONLY,
            Self::BasicAgent => BASIC_AGENT,
            Self::SeniorAgent => SENIOR_AGENT,
            Self::Manager => MANAGER,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetView {
    pub key: PermissionPreset,
    pub label: &'static str,
    pub permissions: PermissionSet,
}

pub fn list_presets() -> Vec<PresetView> {
    PermissionPreset::ALL
        .into_iter()
        .map(|preset| PresetView {
            key: preset,
            label: preset.label(),
            permissions: preset.permissions(),
        })
        .collect()
}
