use clap::{ArgAction, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{service_key, CacheStorage, EnumCache, SqliteStorage};
use crate::config::{Config, ConnectionConfig, ServiceConfig, ServiceKind};
use crate::query::{parse_time, QueryOptions};
use crate::rpc::{HttpTransport, Transport};
use crate::tracker::{self, Attachment, Comment, GetOptions, Item, RoundupClient};

#[derive(Parser, Debug)]
#[command(name = "trk")]
#[command(about = "A command line client for RPC-driven bug trackers")]
#[command(version)]
pub struct Cli {
  /// Path to config file (default: $XDG_CONFIG_HOME/trk/config.yaml)
  #[arg(short, long, global = true)]
  pub config: Option<PathBuf>,

  /// Configured connection to use
  #[arg(short = 'C', long, global = true)]
  pub connection: Option<String>,

  /// Tracker base URL, overriding the connection's
  #[arg(short, long, global = true)]
  pub base: Option<String>,

  /// User to log in as; the password is read from TRK_PASSWORD
  #[arg(short, long, global = true)]
  pub user: Option<String>,

  /// Print results as JSON
  #[arg(long, global = true)]
  pub json: bool,

  /// More logging (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = ArgAction::Count, global = true)]
  pub verbose: u8,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Search for issues
  Search(SearchArgs),

  /// Show issues with their attachments and comments
  Get {
    #[arg(required = true)]
    ids: Vec<u64>,
    /// Skip fetching comments
    #[arg(long)]
    no_comments: bool,
    /// Skip fetching attachment metadata
    #[arg(long)]
    no_attachments: bool,
  },

  /// Show the comments of issues
  Comments {
    #[arg(required = true)]
    ids: Vec<u64>,
  },

  /// Show attachments by file ID
  Attachments {
    #[arg(required = true)]
    ids: Vec<u64>,
    /// Include file contents
    #[arg(long)]
    data: bool,
  },

  /// Dump the tracker's schema
  Schema,

  /// Manage the local enum cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
  /// Refresh status, priority, keyword and user names from the tracker
  Update,
  /// Print the cached tables
  Show,
}

#[derive(clap::Args, Debug, Default)]
pub struct SearchArgs {
  /// Words to look for in issue titles
  pub terms: Vec<String>,

  #[arg(short, long, value_delimiter = ',')]
  pub status: Vec<String>,

  #[arg(long, value_delimiter = ',')]
  pub priority: Vec<String>,

  #[arg(long, value_delimiter = ',')]
  pub assignee: Vec<String>,

  #[arg(long, value_delimiter = ',')]
  pub creator: Vec<String>,

  /// Only issues created since this time (2024-01-31, 2w, ...)
  #[arg(long)]
  pub created: Option<String>,

  /// Only issues modified since this time
  #[arg(long)]
  pub modified: Option<String>,

  /// Sort terms, e.g. -modified,id
  #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
  pub sort: Vec<String>,

  /// Fields to fetch for each result
  #[arg(short, long, value_delimiter = ',')]
  pub fields: Vec<String>,
}

impl SearchArgs {
  pub fn to_options(&self) -> Result<QueryOptions> {
    let mut options = QueryOptions::new();
    let lists = [
      ("terms", &self.terms),
      ("status", &self.status),
      ("priority", &self.priority),
      ("assignee", &self.assignee),
      ("creator", &self.creator),
    ];
    for (field, values) in lists {
      if !values.is_empty() {
        options.insert(field, values.clone());
      }
    }
    for (field, value) in [("created", &self.created), ("modified", &self.modified)] {
      if let Some(value) = value {
        options.insert(field, parse_time(value)?);
      }
    }
    if !self.sort.is_empty() {
      options.insert("sort", self.sort.clone());
    }
    Ok(options)
  }
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
  let overrides = ConnectionConfig {
    base: cli.base.clone(),
    user: cli.user.clone(),
    ..Default::default()
  };
  let service = config.resolve(cli.connection.as_deref(), overrides)?;
  info!(connection = %service.name, endpoint = %service.endpoint, "using tracker");

  let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::open()?);
  let key = service_key(&service.base);

  match cli.command {
    Command::Cache {
      action: CacheAction::Update,
    } => {
      // lookups need no name resolution, so the stored tables stay untouched
      // until the refresh succeeded
      let client = RoundupClient::new(connect(&service)?, EnumCache::detached());
      let updates = client.cache_updates().await?;

      let mut cache = EnumCache::load(key, storage)?;
      for (attribute, values) in updates {
        println!("{}: {} values", attribute, values.len());
        cache.update(attribute, values);
      }
      cache.persist()?;
      println!("Updated cache for {}", service.name);
      Ok(())
    }
    Command::Cache {
      action: CacheAction::Show,
    } => {
      let cache = EnumCache::load(key, storage)?;
      show_cache(&cache, cli.json)
    }
    command => {
      let cache = EnumCache::load(key, storage)?;
      let client = RoundupClient::new(connect(&service)?, cache);
      let result = dispatch(&client, &service, command, cli.json).await;
      if client.cache().saw_stale() {
        eprintln!("hint: the local cache is out of date, run `trk cache update`");
      }
      result
    }
  }
}

fn connect(service: &ServiceConfig) -> Result<Arc<dyn Transport>> {
  match service.service {
    ServiceKind::Roundup => {
      let mut transport = HttpTransport::new(service.endpoint.clone(), service.timeout)?
        .with_translator(tracker::translate);
      if let Some(user) = &service.user {
        transport = transport.with_credentials(user, Config::get_password()?);
      }
      Ok(Arc::new(transport))
    }
  }
}

async fn dispatch(
  client: &RoundupClient,
  service: &ServiceConfig,
  command: Command,
  json: bool,
) -> Result<()> {
  match command {
    Command::Search(args) => {
      let fields = if args.fields.is_empty() {
        service.search_fields.clone()
      } else {
        Some(args.fields.clone())
      };
      let options = args.to_options()?;
      debug!(fields = ?options.fields().collect::<Vec<_>>(), "searching");
      let results = client.search(options, fields).await?;

      if !json {
        println!("Searching for issues with the following options:");
        for option in &results.options {
          println!("  - {}", option);
        }
        println!();
      }
      let mut items = Vec::new();
      let failed = report(results.items, |item| items.push(item));
      if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
      } else {
        for item in &items {
          println!("{}", summary_line(item));
        }
      }
      check(failed)
    }

    Command::Get {
      ids,
      no_comments,
      no_attachments,
    } => {
      let options = GetOptions {
        comments: !no_comments,
        attachments: !no_attachments,
      };
      let mut items = Vec::new();
      let failed = report(client.get(&ids, options).await?, |item| items.push(item));
      if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
      } else {
        for item in &items {
          print_item(item);
        }
      }
      check(failed)
    }

    Command::Comments { ids } => {
      let mut failed = 0;
      let mut output = Vec::new();
      for issue in client.comments(&ids).await? {
        match issue.comments {
          Ok(comments) => output.push((issue.id, comments)),
          Err(e) => {
            eprintln!("error: issue {}: {}", issue.id, e);
            failed += 1;
          }
        }
      }
      if json {
        let value: Vec<_> = output
          .iter()
          .map(|(id, comments)| json!({ "id": id, "comments": comments }))
          .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
      } else {
        for (id, comments) in &output {
          println!("Issue {}", id);
          print_comments(comments);
        }
      }
      check(failed)
    }

    Command::Attachments { ids, data } => {
      let mut attachments = Vec::new();
      let failed = report(client.attachments(&ids, data).await?, |a| {
        attachments.push(a)
      });
      if json {
        println!("{}", serde_json::to_string_pretty(&attachments)?);
      } else {
        print_attachments(&attachments);
        for attachment in &attachments {
          if let Some(data) = &attachment.data {
            println!("\n{}", data);
          }
        }
      }
      check(failed)
    }

    Command::Schema => {
      let schema = client.schema().await?;
      println!("{}", serde_json::to_string_pretty(&schema)?);
      Ok(())
    }

    Command::Cache { .. } => Err(eyre!("cache commands are handled before connecting")),
  }
}

/// Hand successes to `ok`, print failures; returns the number of failures.
fn report<T>(results: Vec<crate::error::Result<T>>, mut ok: impl FnMut(T)) -> usize {
  let mut failed = 0;
  for result in results {
    match result {
      Ok(value) => ok(value),
      Err(e) => {
        eprintln!("error: {}", e);
        failed += 1;
      }
    }
  }
  failed
}

fn check(failed: usize) -> Result<()> {
  match failed {
    0 => Ok(()),
    n => Err(eyre!("{} request(s) failed", n)),
  }
}

fn show_cache(cache: &EnumCache, json: bool) -> Result<()> {
  if json {
    println!("{}", serde_json::to_string_pretty(cache.entries())?);
    return Ok(());
  }
  for (attribute, values) in cache.entries() {
    println!("{} ({} values)", attribute, values.len());
    for (code, name) in (1..).zip(values) {
      println!("  {:>4}  {}", code, name);
    }
  }
  Ok(())
}

fn summary_line(item: &Item) -> String {
  let mut line = format!("{:>7}", item.id);
  if let Some(status) = &item.status {
    line.push_str(&format!("  {:<10}", status));
  }
  line.push_str(&format!(
    "  {:<16}  {}",
    item.assignee.as_deref().unwrap_or("-"),
    item.title.as_deref().unwrap_or("")
  ));
  line
}

fn print_item(item: &Item) {
  let time = |t: &Option<chrono::DateTime<chrono::Utc>>| {
    t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
  };
  let fields: [(&str, Option<String>); 14] = [
    ("Title", item.title.clone()),
    ("Status", item.status.clone()),
    ("Priority", item.priority.clone()),
    ("Type", item.issue_type.clone()),
    ("Severity", item.severity.clone()),
    ("Stage", item.stage.clone()),
    ("Resolution", item.resolution.clone()),
    ("Assignee", item.assignee.clone()),
    ("Reporter", item.creator.clone()),
    ("Created", time(&item.created)),
    ("Modified", time(&item.modified)),
    ("Modified by", item.modified_by.clone()),
    ("Keywords", list(&item.keywords)),
    ("Components", list(&item.components)),
  ];
  let more: [(&str, Option<String>); 5] = [
    ("Versions", list(&item.versions)),
    ("Depends", list(&item.dependencies)),
    ("Duplicate of", list(&item.superseder)),
    ("PRs", list(&item.pull_requests)),
    ("Nosy List", list(&item.nosy)),
  ];

  println!("{:=<72}", "");
  println!("{:<14}: {}", "ID", item.id);
  for (label, value) in fields.iter().chain(more.iter()) {
    if let Some(value) = value {
      println!("{:<14}: {}", label, value);
    }
  }
  if !item.attachments.is_empty() {
    println!("\nAttachments:");
    print_attachments(&item.attachments);
  }
  if !item.comments.is_empty() {
    println!();
    print_comments(&item.comments);
  }
  println!();
}

fn list(values: &[String]) -> Option<String> {
  (!values.is_empty()).then(|| values.join(", "))
}

fn print_comments(comments: &[Comment]) {
  for comment in comments {
    println!(
      "Comment #{} by {}, {}",
      comment.count,
      comment.creator,
      comment.created.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("{:-<72}", "");
    println!("{}\n", comment.text);
  }
}

fn print_attachments(attachments: &[Attachment]) {
  for attachment in attachments {
    println!(
      "  {:>7}  {:<32} {:<24} {} ({})",
      attachment.id,
      attachment.filename,
      attachment.mimetype,
      attachment.creator,
      attachment.created.format("%Y-%m-%d")
    );
  }
}
