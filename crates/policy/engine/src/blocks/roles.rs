//! Role selection block: a user picks one of the declared policy roles.

use crate::block::{BlockContext, BlockHandler, BlockOptions, BlockOutput};
use crate::registry::{parse_options_as, BlockAbout, BlockDescriptor};
use crate::tree::BlockNode;
use crate::validator::ValidatorContext;
use async_trait::async_trait;
use policy_storage::{DocumentKind, DocumentRecord};
use policy_types::{OutputEvent, PolicyResult, PolicyUser};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

pub const BLOCK_TYPE: &str = "policyRolesBlock";

const ROLE_KEY: &str = "role";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RolesOptions {
    #[serde(default)]
    pub roles: Vec<String>,
}

pub struct PolicyRolesBlock;

impl PolicyRolesBlock {
    fn roles<'a>(ctx: &'a BlockContext<'_>) -> &'a [String] {
        match ctx.options() {
            BlockOptions::Roles(options) => &options.roles,
            _ => &[],
        }
    }
}

#[async_trait]
impl BlockHandler for PolicyRolesBlock {
    fn block_type(&self) -> &'static str {
        BLOCK_TYPE
    }

    async fn get_data(
        &self,
        ctx: &BlockContext<'_>,
        user: &PolicyUser,
    ) -> PolicyResult<serde_json::Value> {
        let assigned: Option<String> = ctx.cache().get_cache(ROLE_KEY, Some(user)).await?;
        Ok(serde_json::json!({
            "roles": Self::roles(ctx),
            "assigned": assigned,
        }))
    }

    async fn set_data(
        &self,
        ctx: &BlockContext<'_>,
        user: &PolicyUser,
        data: serde_json::Value,
    ) -> PolicyResult<BlockOutput> {
        let role = data
            .get(ROLE_KEY)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ctx.action_error("missing 'role' field"))?;
        if !Self::roles(ctx).iter().any(|r| r == role) {
            return Err(ctx.action_error(format!("unknown role '{role}'")));
        }

        ctx.cache()
            .set_cache(ROLE_KEY, &role.to_string(), Some(user))
            .await?;
        ctx.policy
            .documents
            .save(DocumentRecord::new(
                ctx.policy.policy_id.clone(),
                user.did.clone(),
                DocumentKind::Role,
                serde_json::json!({ "role": role, "username": user.username }),
            ))
            .await?;

        tracing::info!(
            policy_id = %ctx.policy.policy_id,
            user = %user.did,
            role,
            "Role assigned"
        );

        let payload = serde_json::json!({ "role": role });
        Ok(BlockOutput::data(payload.clone()).with_emit(OutputEvent::RunEvent, payload))
    }

    fn validate(&self, node: &BlockNode, ctx: &mut ValidatorContext<'_>) {
        let BlockOptions::Roles(options) = &node.options else {
            return;
        };
        if options.roles.is_empty() {
            ctx.error("at least one role is required");
        }
        let mut seen = HashSet::new();
        for role in &options.roles {
            if !seen.insert(role) {
                ctx.error(format!("duplicate role '{role}'"));
            }
        }
    }
}

pub fn descriptor() -> BlockDescriptor {
    BlockDescriptor {
        about: BlockAbout {
            block_type: BLOCK_TYPE,
            label: "Policy Roles",
            capabilities: &["getData", "setData", "validate"],
        },
        handler: Arc::new(PolicyRolesBlock),
        parse_options: |value| Ok(BlockOptions::Roles(parse_options_as(value)?)),
    }
}
