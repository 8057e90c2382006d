use super::value_objects::UsagePatch;

// ============================================================================
// Request Domain Commands
// ============================================================================

#[derive(Debug, Clone)]
pub enum RequestCommand {
    CreateDraft,
    AddService {
        service_id: i64,
    },
    RemoveService {
        request_id: i64,
        service_id: i64,
    },
    SetSupportCoefficient {
        request_id: i64,
        service_id: i64,
        coefficient: f64,
    },
    UpdateUsage {
        request_id: i64,
        patch: UsagePatch,
    },
    Format {
        request_id: i64,
    },
    Complete {
        request_id: i64,
    },
    Reject {
        request_id: i64,
    },
    Delete {
        request_id: i64,
    },
}

impl RequestCommand {
    pub fn name(&self) -> &'static str {
        match self {
            RequestCommand::CreateDraft => "create_draft",
            RequestCommand::AddService { .. } => "add_service",
            RequestCommand::RemoveService { .. } => "remove_service",
            RequestCommand::SetSupportCoefficient { .. } => "set_support_coefficient",
            RequestCommand::UpdateUsage { .. } => "update_usage",
            RequestCommand::Format { .. } => "format",
            RequestCommand::Complete { .. } => "complete",
            RequestCommand::Reject { .. } => "reject",
            RequestCommand::Delete { .. } => "delete",
        }
    }

    /// Target request, when the command names one explicitly.
    pub fn request_id(&self) -> Option<i64> {
        match self {
            RequestCommand::CreateDraft | RequestCommand::AddService { .. } => None,
            RequestCommand::RemoveService { request_id, .. }
            | RequestCommand::SetSupportCoefficient { request_id, .. }
            | RequestCommand::UpdateUsage { request_id, .. }
            | RequestCommand::Format { request_id }
            | RequestCommand::Complete { request_id }
            | RequestCommand::Reject { request_id }
            | RequestCommand::Delete { request_id } => Some(*request_id),
        }
    }
}
