use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use console::style;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::{IndexReport, Note, RagQuery, Source, SummaryOptions, SummaryStyle};
use crate::system::RagSystem;

/// Notes handed to the embedding engine per progress step
const INDEX_BATCH_SIZE: usize = 8;

/// Read a JSON array of notes
#[inline]
pub fn load_notes(path: &Path) -> Result<Vec<Note>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read notes file: {}", path.display()))?;
    let notes: Vec<Note> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse notes file: {}", path.display()))?;
    info!("Loaded {} notes from {}", notes.len(), path.display());
    Ok(notes)
}

fn find_note<'a>(notes: &'a [Note], note_id: &str) -> Result<&'a Note> {
    notes
        .iter()
        .find(|note| note.id == note_id)
        .ok_or_else(|| anyhow!("Note not found: {}", note_id))
}

fn progress_bar(len: usize) -> ProgressBar {
    if console::user_attended_stderr() {
        ProgressBar::new(len as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] {bar:30} {msg}")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    }
}

/// Index every note in `path`. With `replace`, previous chunks of each note
/// are swapped out.
#[inline]
pub async fn index_notes(system: &RagSystem, path: &Path, replace: bool) -> Result<()> {
    let notes = load_notes(path)?;
    system.initialize().await?;

    let bar = progress_bar(notes.len());
    let mut total = IndexReport::default();
    for batch in notes.chunks(INDEX_BATCH_SIZE) {
        if let Some(first) = batch.first() {
            bar.set_message(first.title.clone());
        }
        let report = if replace {
            system.update_notes(batch).await?
        } else {
            system.process_notes(batch).await?
        };
        total.notes_indexed += report.notes_indexed;
        total.chunks_indexed += report.chunks_indexed;
        total.failures.extend(report.failures);
        bar.inc(batch.len() as u64);
    }
    bar.finish_and_clear();

    println!(
        "Indexed {} notes ({} chunks)",
        total.notes_indexed, total.chunks_indexed
    );
    if !total.is_complete() {
        println!("{} notes failed:", total.failures.len());
        for failure in &total.failures {
            println!("  {}: {}", failure.note_id, failure.error);
        }
    }
    Ok(())
}

#[inline]
pub async fn remove_notes(system: &RagSystem, note_ids: &[String]) -> Result<()> {
    let removed = system.remove_notes(note_ids).await?;
    println!("Removed {} chunks", removed);
    Ok(())
}

fn print_sources(sources: &[Source]) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("{}", style("Sources:").bold());
    for (i, source) in sources.iter().enumerate() {
        println!(
            "  [{}] {} ({}) {:.2}",
            i + 1,
            source.title,
            style(&source.note_id).dim(),
            source.score
        );
    }
}

/// Answer a question. Without a language model the matching notes are listed.
#[inline]
pub async fn query(
    system: &RagSystem,
    text: &str,
    top_k: Option<usize>,
    stream: bool,
) -> Result<()> {
    let mut query = RagQuery::new(text);
    if let Some(top_k) = top_k {
        query = query.with_top_k(top_k);
    }

    system.initialize().await?;
    if !system.get_stats().await.llm_available {
        warn!("No language model available, listing relevant notes only");
        let sources = system.search(query).await?;
        if sources.is_empty() {
            println!("No relevant notes found.");
        }
        print_sources(&sources);
        return Ok(());
    }

    if stream {
        let mut answer = system.stream_query(query).await?;
        let mut stdout = std::io::stdout();
        while let Some(fragment) = answer.tokens.next().await {
            write!(stdout, "{}", fragment?)?;
            stdout.flush()?;
        }
        println!();
        print_sources(&answer.sources);
    } else {
        let response = system.query(query).await?;
        println!("{}", response.answer);
        print_sources(&response.sources);
    }
    Ok(())
}

#[inline]
pub async fn similar_notes(system: &RagSystem, note_id: &str, limit: usize) -> Result<()> {
    let similar = system.get_similar_notes(note_id, limit).await?;
    if similar.is_empty() {
        println!("No similar notes found for {}", note_id);
    }
    for source in &similar {
        println!("{:.2}  {} ({})", source.score, source.title, source.note_id);
    }
    Ok(())
}

/// Suggest tags for one note, using every tag in the file as vocabulary
#[inline]
pub async fn suggest_tags(system: &RagSystem, path: &Path, note_id: &str) -> Result<()> {
    let notes = load_notes(path)?;
    let note = find_note(&notes, note_id)?;
    system
        .update_tags_list(notes.iter().flat_map(|n| n.tags.iter()))
        .await;

    let suggestions = system.suggest_tags(note, None).await?;
    if suggestions.is_empty() {
        println!("No tag suggestions for {}", note.title);
        return Ok(());
    }

    println!("{}", style(format!("Suggested tags for {}:", note.title)).bold());
    for suggestion in &suggestions {
        println!(
            "  {:<24} {:.2}  {}",
            suggestion.tag,
            suggestion.confidence,
            style(suggestion.reason.as_deref().unwrap_or_default()).dim()
        );
    }
    let applied = system.apply_tags(
        note,
        &suggestions.iter().map(|s| s.tag.clone()).collect::<Vec<_>>(),
    )?;
    println!("Tags after applying: {}", applied.tags.iter().join(", "));
    Ok(())
}

#[inline]
pub async fn summarize_note(
    system: &RagSystem,
    path: &Path,
    note_id: &str,
    style_choice: SummaryStyle,
) -> Result<()> {
    let notes = load_notes(path)?;
    let note = find_note(&notes, note_id)?;

    let summary = system
        .summarize_note(note, &SummaryOptions::with_style(style_choice))
        .await?;
    println!("{}", summary.summary);
    println!();
    println!(
        "{}",
        style(format!(
            "{} words, {} min read, {}",
            summary.word_count, summary.reading_time, summary.style
        ))
        .dim()
    );
    Ok(())
}

#[inline]
pub async fn show_stats(system: &RagSystem) -> Result<()> {
    system.initialize().await?;
    let stats = system.get_stats().await;

    println!("{}", style("Index").bold().cyan());
    println!("  Notes: {}", stats.indexed_notes);
    println!("  Chunks: {}", stats.indexed_chunks);
    println!("  Model: {}", stats.model);
    if let Some(dimension) = stats.dimension {
        println!("  Dimension: {}", dimension);
    }
    println!(
        "  Language model: {}",
        if stats.llm_available {
            style("available").green()
        } else {
            style("unavailable").yellow()
        }
    );
    println!("  Known tags: {}", stats.known_tags);
    Ok(())
}

#[inline]
pub async fn clear_index(system: &RagSystem) -> Result<()> {
    system.clear_data().await?;
    println!("Cleared all indexed notes");
    Ok(())
}

/// Print the configuration, writing defaults first when no file exists
#[inline]
pub fn show_config(base_dir: &Path, show_only: bool) -> Result<()> {
    let config = Config::load(base_dir).context("Failed to load configuration")?;
    let path = config.config_file_path();

    if !show_only && !path.exists() {
        config.save()?;
        eprintln!("{}", style("Wrote default configuration.").green());
    }

    print!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to serialize config to TOML")?
    );
    eprintln!();
    eprintln!("Config file: {}", style(path.display()).dim());
    Ok(())
}
