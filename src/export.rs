// 📤 Export Generator - advisory join-assist artifact
// Header with the recommended delay, then one pending link per line.
// Nothing is executed against the remote service.

use crate::classifier::LinkKind;
use crate::cooldown::CooldownController;
use crate::db::{self, Store};
use crate::error::Result;
use crate::queue::LinkQueue;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Kinds that go into the assist artifact
pub const EXPORT_KINDS: [LinkKind; 2] = [LinkKind::GroupInvite, LinkKind::Unclassified];

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub session_name: String,
    pub recommended_delay: f64,
    pub links: Vec<String>,
}

impl Artifact {
    pub fn header(&self) -> String {
        format!(
            "Recommended delay between joins for {}: {:.0} seconds",
            self.session_name, self.recommended_delay
        )
    }

    /// Plain text: header line, then one identifier per line
    pub fn render(&self) -> String {
        let mut out = self.header();
        out.push('\n');
        for link in &self.links {
            out.push_str(link);
            out.push('\n');
        }
        out
    }

    pub fn file_name(&self) -> String {
        format!("assist_{}.txt", self.session_name)
    }

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        fs::write(&path, self.render())?;
        Ok(path)
    }
}

/// None means "nothing pending", which is not an error
pub fn generate(
    store: &Store,
    queue: &LinkQueue,
    cooldown: &CooldownController,
    session_name: &str,
) -> Result<Option<Artifact>> {
    let conn = db::lock(store)?;

    let links = queue.list_pending(&conn, &EXPORT_KINDS)?;
    if links.is_empty() {
        return Ok(None);
    }

    let recommended_delay = cooldown.get(&conn, session_name)?;
    info!(session = session_name, links = links.len(), recommended_delay, "export generated");

    Ok(Some(Artifact {
        session_name: session_name.to_string(),
        recommended_delay,
        links,
    }))
}
