use criterion::{Criterion, criterion_group, criterion_main};
use notes_rag::Note;
use notes_rag::embeddings::{ChunkingConfig, EmbeddingModel, HashingModel, chunk_note};
use std::fmt::Write;
use std::hint::black_box;

fn sample_note() -> Note {
    let mut content = String::new();
    for section in 0..12 {
        let _ = writeln!(content, "## Section {}\n", section);
        for paragraph in 0..4 {
            let _ = writeln!(
                content,
                "Paragraph {} of section {} talks about ownership, borrowing and lifetimes in \
                 some depth, with enough words to push the chunker past its target size.\n",
                paragraph, section
            );
        }
        let _ = writeln!(content, "- first point\n- second point\n- third point\n");
        let _ = writeln!(content, "```rust\nfn main() {{ println!(\"{}\"); }}\n```\n", section);
    }
    Note::new("bench", "Benchmark note", content).with_tags(["rust", "bench"])
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let note = sample_note();
    let config = ChunkingConfig::default();
    c.bench_function("chunking", |b| {
        b.iter(|| chunk_note(black_box(&note), black_box(&config)))
    });

    let chunks = chunk_note(&note, &config);
    let mut model = HashingModel::new(384);
    c.bench_function("hashing_embedding", |b| {
        b.iter(|| {
            for chunk in &chunks {
                black_box(
                    model
                        .embed(black_box(&chunk.embedding_text()))
                        .expect("can embed chunk"),
                );
            }
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
