use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use passim::query::trec;
use passim::{
    merge, parser, stats, verify, IndexPaths, ParserConfig, QueryIndex, QueryMode, SearchSession,
};

#[derive(Parser)]
#[command(name = "passim")]
#[command(about = "Batch-built disk-resident BM25 passage search engine", long_about = None)]
#[command(version)]
struct Args {
    /// Directory holding (or receiving) the index artifacts
    #[arg(long, env = "PASSIM_INDEX_DIR", default_value = "./index", global = true)]
    index_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a docID\tpassage TSV into partition files and document tables
    Parse {
        /// Input TSV file
        input: PathBuf,

        /// Flush the in-memory postings map after this many input bytes
        #[arg(long, default_value_t = passim::config::DEFAULT_FLUSH_THRESHOLD_BYTES)]
        flush_threshold_bytes: u64,
    },

    /// Merge partition files into the final compressed index and lexicon
    Merge,

    /// Compute the average document length from the doc-lengths table
    Avgdl,

    /// Run interactive queries against a built index
    Search {
        /// Fix the query mode for the whole session instead of prompting
        #[arg(long, value_parser = parse_mode)]
        mode: Option<QueryMode>,

        /// Number of results per query
        #[arg(short, long, default_value_t = passim::config::DEFAULT_TOP_K)]
        top_k: usize,
    },

    /// Evaluate a query file and write a TREC run
    Batch {
        /// Queries TSV (qid\ttext with a one-line header)
        queries: PathBuf,

        /// Output TREC run file
        output: PathBuf,

        /// Number of results per query
        #[arg(short, long, default_value_t = passim::config::DEFAULT_BATCH_TOP_K)]
        top_k: usize,
    },

    /// Decode and print the postings list of one term
    Inspect {
        /// Term to look up in the lexicon
        term: String,
    },

    /// Retrieve the stored passage for one docID
    Fetch {
        /// Document ID to look up in the page table
        doc_id: u32,
    },

    /// Check the structural invariants of a built index
    Verify,
}

fn parse_mode(s: &str) -> Result<QueryMode, String> {
    s.parse::<QueryMode>().map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let paths = IndexPaths::new(&args.index_dir);

    match args.command {
        Command::Parse {
            input,
            flush_threshold_bytes,
        } => {
            info!("passim v{} parsing {}", passim::VERSION, input.display());
            let config = ParserConfig::default().with_flush_threshold(flush_threshold_bytes);
            let stats = parser::parse_file(&input, &paths, &config)
                .with_context(|| format!("parsing {}", input.display()))?;
            println!(
                "parsed {} documents ({} tokens) into {} partitions; {} lines skipped",
                stats.docs_indexed, stats.total_tokens, stats.partitions, stats.lines_skipped
            );
        }

        Command::Merge => {
            let stats = merge::merge_index(&paths)
                .with_context(|| format!("merging partitions under {}", args.index_dir.display()))?;
            println!(
                "merged {} terms ({} postings) into {} index bytes",
                stats.terms, stats.postings, stats.index_bytes
            );
        }

        Command::Avgdl => {
            let avgdl = stats::compute_avgdl(&paths.doc_lengths(), &paths.avgdl())
                .context("computing average document length")?;
            println!("avgdl: {}", avgdl);
        }

        Command::Search { mode, top_k } => {
            let mut index = QueryIndex::open(&paths).context("opening index")?;
            let stdin = std::io::stdin();
            let session =
                SearchSession::new(&mut index, stdin.lock(), std::io::stdout(), mode, top_k);
            let summary = session.run()?;
            info!(
                "session closed after {} queries ({} with results)",
                summary.queries, summary.queries_with_results
            );
        }

        Command::Batch {
            queries,
            output,
            top_k,
        } => {
            let mut index = QueryIndex::open(&paths).context("opening index")?;
            let count = trec::run_batch(&mut index, &queries, &output, top_k)
                .context("running batch queries")?;
            println!("wrote TREC run for {} queries to {}", count, output.display());
        }

        Command::Inspect { term } => {
            let mut index = QueryIndex::open(&paths).context("opening index")?;
            match index.postings(&term)? {
                Some(postings) => {
                    println!("postings for '{}' ({} documents):", term, postings.len());
                    for (doc_id, tf) in postings {
                        println!("{}\t{}", doc_id, tf);
                    }
                }
                None => bail!("term '{}' not found in lexicon", term),
            }
        }

        Command::Fetch { doc_id } => {
            let mut index = QueryIndex::open(&paths).context("opening index")?;
            let passage = index.passage(doc_id);
            if passage == "[Not Found]" {
                bail!("docID {} not found in page table", doc_id);
            }
            println!("{}", passage);
        }

        Command::Verify => {
            let report = verify::verify_index(&paths).context("verifying index")?;
            println!(
                "checked {} terms / {} postings",
                report.terms_checked, report.postings_checked
            );
            if report.is_clean() {
                println!("index is consistent");
            } else {
                for violation in &report.violations {
                    println!("{}", violation);
                }
                bail!("{} invariant violations found", report.violations.len());
            }
        }
    }

    Ok(())
}
