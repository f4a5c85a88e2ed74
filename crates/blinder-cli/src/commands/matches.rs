//! Matches command - check a request against the filter engine.

use anyhow::Result;
use blinder_platform::{ContentType, Filter, FilterType, Platform};
use clap::Args;

use crate::config::Config;

#[derive(Args)]
pub struct MatchesCommand {
    /// Request URL
    pub url: String,

    /// Content type of the request, e.g. IMAGE or SCRIPT
    #[arg(long = "type", short = 't', default_value = "OTHER", value_parser = parse_content_type)]
    pub content_type: ContentType,

    /// URL of the document issuing the request
    #[arg(long = "document", short = 'd')]
    pub document_url: Option<String>,

    /// Sitekey of the document
    #[arg(long)]
    pub sitekey: Option<String>,

    /// Ignore generic filters
    #[arg(long)]
    pub specific_only: bool,
}

impl MatchesCommand {
    pub async fn run(&self, platform: &Platform, config: &Config) -> Result<()> {
        let engine = super::filter_engine(platform, config).await?;
        let filter = engine.matches(
            &self.url,
            self.content_type,
            self.document_url.as_deref(),
            self.sitekey.as_deref(),
            self.specific_only,
        )?;
        println!("{}", verdict(filter.as_ref()));
        Ok(())
    }
}

pub fn parse_content_type(name: &str) -> Result<ContentType, String> {
    ContentType::from_name(name).ok_or_else(|| {
        let known: Vec<_> = ContentType::ALL.iter().map(|t| t.name()).collect();
        format!("unknown content type `{name}` (expected one of {})", known.join(", "))
    })
}

fn verdict(filter: Option<&Filter>) -> String {
    match filter {
        Some(filter) if filter.filter_type == FilterType::Exception => {
            format!("Allowlisted by {}", filter.text)
        }
        Some(filter) => format!("Blocked by {}", filter.text),
        None => "Not blocked".to_string(),
    }
}
