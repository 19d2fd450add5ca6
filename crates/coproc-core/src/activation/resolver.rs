//! Host-supplied collaborators used by the activation dispatcher.
//!
//! Each trait is object-safe (boxed futures) so the dispatcher can hold any
//! subset of them as `Arc<dyn ...>`. Returning `Ok(None)` means "not found";
//! an `Err` means the resolver itself failed. Neither ever escapes the
//! dispatcher -- both become a failed `ActivationResult`.

use std::collections::HashMap;
use std::path::PathBuf;

use coproc_types::activation::{OffloadOperation, OffloadOutcome, ResolvedSkill, ResolvedTeam};
use futures_util::future::BoxFuture;

/// Locates skills by name.
pub trait SkillResolver: Send + Sync {
    fn resolve_skill<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<ResolvedSkill>>>;
}

/// Locates runnable scripts by name (including skills promoted to scripts).
pub trait ScriptResolver: Send + Sync {
    fn resolve_script<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<OffloadOperation>>>;
}

/// Locates teams by name.
pub trait TeamResolver: Send + Sync {
    fn resolve_team<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<ResolvedTeam>>>;
}

/// Runs an offload operation outside the model context.
///
/// No timeout is imposed by the kernel; a hung executor stalls its instruction.
pub trait OffloadExecutor: Send + Sync {
    fn execute_offload<'a>(
        &'a self,
        operation: &'a OffloadOperation,
    ) -> BoxFuture<'a, anyhow::Result<OffloadOutcome>>;
}

// ---------------------------------------------------------------------------
// InMemoryResolver
// ---------------------------------------------------------------------------

/// Map-backed resolver for skills, scripts and teams.
///
/// Useful for hosts that preload metadata, and for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResolver {
    skills: HashMap<String, ResolvedSkill>,
    scripts: HashMap<String, OffloadOperation>,
    teams: HashMap<String, ResolvedTeam>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skill(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        let name = name.into();
        let path = PathBuf::from(format!("skills/{name}/SKILL.md"));
        self.skills.insert(
            name,
            ResolvedSkill {
                path,
                content: content.into(),
            },
        );
        self
    }

    pub fn with_script(mut self, name: impl Into<String>, command: impl Into<String>) -> Self {
        let name = name.into();
        self.scripts.insert(
            name.clone(),
            OffloadOperation {
                name,
                command: command.into(),
                args: Vec::new(),
                working_dir: None,
            },
        );
        self
    }

    pub fn with_team(mut self, name: impl Into<String>, members: &[&str]) -> Self {
        let name = name.into();
        self.teams.insert(
            name.clone(),
            ResolvedTeam {
                name,
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
        self
    }
}

impl SkillResolver for InMemoryResolver {
    fn resolve_skill<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<ResolvedSkill>>> {
        Box::pin(async move { Ok(self.skills.get(name).cloned()) })
    }
}

impl ScriptResolver for InMemoryResolver {
    fn resolve_script<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<OffloadOperation>>> {
        Box::pin(async move { Ok(self.scripts.get(name).cloned()) })
    }
}

impl TeamResolver for InMemoryResolver {
    fn resolve_team<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<ResolvedTeam>>> {
        Box::pin(async move { Ok(self.teams.get(name).cloned()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_resolver_finds_registered_entries() {
        let resolver = InMemoryResolver::new()
            .with_skill("review", "# Review\nLook carefully.")
            .with_script("lint", "cargo clippy")
            .with_team("qa", &["tester", "reviewer"]);

        let skill = resolver.resolve_skill("review").await.unwrap().unwrap();
        assert!(skill.content.starts_with("# Review"));
        assert!(skill.path.ends_with("SKILL.md"));

        let script = resolver.resolve_script("lint").await.unwrap().unwrap();
        assert_eq!(script.command, "cargo clippy");

        let team = resolver.resolve_team("qa").await.unwrap().unwrap();
        assert_eq!(team.members, vec!["tester", "reviewer"]);

        assert!(resolver.resolve_skill("missing").await.unwrap().is_none());
    }
}
