//! Interactive query session
//!
//! Drives one query-processor session over arbitrary line-based input and
//! output streams: Idle -> ReadingQuery -> Executing -> Emitting -> Idle,
//! terminated by the `exit` sentinel or end of input. Term-level failures
//! during execution never end the session.

use std::io::{BufRead, Write};

use crate::error::Result;

use super::{QueryIndex, QueryMode, RankedDoc};

/// Phase of the session loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ReadingQuery,
    Executing,
    Emitting,
}

/// Counters for one completed session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Queries evaluated (empty inputs excluded).
    pub queries: u64,
    /// Queries that produced at least one result.
    pub queries_with_results: u64,
}

/// One interactive session against an opened index.
pub struct SearchSession<'a, R, W> {
    index: &'a mut QueryIndex,
    input: R,
    output: W,
    /// Mode fixed for the whole session, or `None` to ask per query.
    session_mode: Option<QueryMode>,
    top_k: usize,
    state: SessionState,
}

impl<'a, R: BufRead, W: Write> SearchSession<'a, R, W> {
    pub fn new(
        index: &'a mut QueryIndex,
        input: R,
        output: W,
        session_mode: Option<QueryMode>,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            input,
            output,
            session_mode,
            top_k,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run until the `exit` sentinel or end of input.
    pub fn run(mut self) -> Result<SessionSummary> {
        let mut summary = SessionSummary::default();

        loop {
            self.state = SessionState::Idle;
            let Some(mode) = self.next_mode()? else {
                break;
            };

            self.state = SessionState::ReadingQuery;
            write!(self.output, "query (or 'exit'): ")?;
            self.output.flush()?;
            let Some(query) = self.read_line()? else {
                break;
            };
            if query.trim() == "exit" {
                break;
            }
            if query.trim().is_empty() {
                continue;
            }

            self.state = SessionState::Executing;
            let results = self.index.evaluate(&query, mode, self.top_k);
            summary.queries += 1;
            if !results.is_empty() {
                summary.queries_with_results += 1;
            }

            self.state = SessionState::Emitting;
            self.emit(&results)?;
        }

        self.state = SessionState::Idle;
        Ok(summary)
    }

    /// Resolve the mode for the next query, prompting until valid input when
    /// no session mode is fixed. `None` ends the session.
    fn next_mode(&mut self) -> Result<Option<QueryMode>> {
        if let Some(mode) = self.session_mode {
            return Ok(Some(mode));
        }

        loop {
            write!(self.output, "mode (1 = conjunctive, 2 = disjunctive): ")?;
            self.output.flush()?;
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            if line.trim() == "exit" {
                return Ok(None);
            }
            match line.parse::<QueryMode>() {
                Ok(mode) => return Ok(Some(mode)),
                Err(_) => writeln!(self.output, "invalid mode, enter 1 or 2")?,
            }
        }
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn emit(&mut self, results: &[RankedDoc]) -> Result<()> {
        if results.is_empty() {
            writeln!(self.output, "no matching documents\n")?;
            return Ok(());
        }

        for (rank, doc) in results.iter().enumerate() {
            let passage = self.index.passage(doc.doc_id);
            writeln!(
                self.output,
                "{}. DocID: {} | Score: {:.4}\nPassage: {}\n",
                rank + 1,
                doc.doc_id,
                doc.score,
                passage
            )?;
        }
        Ok(())
    }
}
