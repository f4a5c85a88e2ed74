//! Elemhide command - print element hiding rules for a domain.

use anyhow::Result;
use blinder_platform::Platform;
use clap::Args;

use crate::config::Config;

#[derive(Args)]
pub struct ElemhideCommand {
    /// Domain of the document
    pub domain: String,

    /// Only rules that name the domain
    #[arg(long)]
    pub specific_only: bool,
}

impl ElemhideCommand {
    pub async fn run(&self, platform: &Platform, config: &Config) -> Result<()> {
        let engine = super::filter_engine(platform, config).await?;

        let style_sheet = engine.element_hiding_style_sheet(&self.domain, self.specific_only)?;
        if !style_sheet.is_empty() {
            println!("{}", style_sheet.trim_end());
        }
        for selector in engine.element_hiding_emulation_selectors(&self.domain)? {
            println!("{}\t{}", selector.selector, selector.text);
        }
        Ok(())
    }
}
