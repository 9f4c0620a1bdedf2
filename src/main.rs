use std::path::PathBuf;

use clap::{Parser, Subcommand};
use notes_rag::commands::{
    clear_index, index_notes, query, remove_notes, show_config, show_stats, similar_notes,
    suggest_tags, summarize_note,
};
use notes_rag::config::get_config_dir;
use notes_rag::{RagSystem, Result, SummaryStyle};

#[derive(Parser)]
#[command(name = "notes-rag")]
#[command(about = "Semantic search, answers, tags and summaries over your notes")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the embedding store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configuration, creating a default file if none exists
    Config {
        /// Only print the current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add notes from a JSON file to the index
    Index {
        /// JSON array of notes
        notes: PathBuf,
    },
    /// Re-index edited notes, replacing their previous chunks
    Update {
        /// JSON array of notes
        notes: PathBuf,
    },
    /// Remove notes from the index
    Remove {
        #[arg(required = true)]
        note_ids: Vec<String>,
    },
    /// Ask a question about the indexed notes
    Query {
        text: String,
        /// Number of chunks to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,
    },
    /// List notes similar to an indexed note
    Similar {
        note_id: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Suggest tags for a note
    Tags {
        /// JSON array of notes containing the note
        notes: PathBuf,
        note_id: String,
    },
    /// Summarize a note
    Summarize {
        /// JSON array of notes containing the note
        notes: PathBuf,
        note_id: String,
        #[arg(long, value_enum, default_value_t = SummaryStyle::Brief)]
        style: SummaryStyle,
    },
    /// Show index statistics
    Stats,
    /// Remove every indexed note
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(get_config_dir);

    if let Commands::Config { show } = cli.command {
        show_config(&data_dir, show)?;
        return Ok(());
    }

    let system = RagSystem::open(&data_dir)?;
    let outcome = match cli.command {
        Commands::Config { .. } => Ok(()),
        Commands::Index { notes } => index_notes(&system, &notes, false).await,
        Commands::Update { notes } => index_notes(&system, &notes, true).await,
        Commands::Remove { note_ids } => remove_notes(&system, &note_ids).await,
        Commands::Query {
            text,
            top_k,
            stream,
        } => query(&system, &text, top_k, stream).await,
        Commands::Similar { note_id, limit } => similar_notes(&system, &note_id, limit).await,
        Commands::Tags { notes, note_id } => suggest_tags(&system, &notes, &note_id).await,
        Commands::Summarize {
            notes,
            note_id,
            style,
        } => summarize_note(&system, &notes, &note_id, style).await,
        Commands::Stats => show_stats(&system).await,
        Commands::Clear => clear_index(&system).await,
    };
    system.destroy().await;
    outcome?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["notes-rag", "stats"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Stats));
            assert!(parsed.data_dir.is_none());
        }
    }

    #[test]
    fn index_command_with_file() {
        let cli = Cli::try_parse_from(["notes-rag", "index", "notes.json"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Index { notes } = parsed.command {
                assert_eq!(notes, PathBuf::from("notes.json"));
            }
        }
    }

    #[test]
    fn query_command_with_options() {
        let cli = Cli::try_parse_from([
            "notes-rag",
            "query",
            "what is borrowing?",
            "--top-k",
            "3",
            "--stream",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Query {
                text,
                top_k,
                stream,
            } = parsed.command
            {
                assert_eq!(text, "what is borrowing?");
                assert_eq!(top_k, Some(3));
                assert!(stream);
            }
        }
    }

    #[test]
    fn summarize_style_values() {
        let cli = Cli::try_parse_from([
            "notes-rag",
            "summarize",
            "notes.json",
            "n1",
            "--style",
            "bullet-points",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Summarize { style, .. } = parsed.command {
                assert_eq!(style, SummaryStyle::BulletPoints);
            }
        }

        let cli = Cli::try_parse_from([
            "notes-rag",
            "summarize",
            "notes.json",
            "n1",
            "--style",
            "verbose",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn similar_limit_defaults() {
        let cli = Cli::try_parse_from(["notes-rag", "similar", "n1"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Similar { note_id, limit } = parsed.command {
                assert_eq!(note_id, "n1");
                assert_eq!(limit, 5);
            }
        }
    }

    #[test]
    fn data_dir_is_global() {
        let cli = Cli::try_parse_from(["notes-rag", "clear", "--data-dir", "/tmp/notes"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.data_dir, Some(PathBuf::from("/tmp/notes")));
        }
    }

    #[test]
    fn remove_requires_ids() {
        let cli = Cli::try_parse_from(["notes-rag", "remove"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["notes-rag", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["notes-rag", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["notes-rag", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
