//! Plaintext docfiles.
//!
//! Each document occupies a block of lines:
//!
//! ```text
//! 3,7,12        <- term ids
//! 1,2,1         <- counts
//! 4,9           <- reader ids   (only with readers)
//! 1,3           <- ratings      (only with readers)
//! ```
//!
//! An empty line stands for an empty list. Vocabulary and user files
//! list one label per line; line `i` labels id `i`.

use crate::corpus::Corpus;
use crate::document::Document;
use crate::error::CorpusError;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Open a file for reading--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

/// Open a file for writing--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }
    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

/// Read one label per line
pub fn read_labels(input_file: &str) -> anyhow::Result<Vec<Box<str>>> {
    let mut labels = vec![];
    for line in open_buf_reader(input_file)?.lines() {
        labels.push(line?.trim().into());
    }
    Ok(labels)
}

/// Write one label per line
pub fn write_labels(labels: &[Box<str>], output_file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    for x in labels {
        writeln!(buf, "{}", x)?;
    }
    buf.flush()?;
    Ok(())
}

/// Read a docfile plus optional dictionaries into a validated corpus.
///
/// * `docfile` - document blocks
/// * `vocabfile` - term labels (numeric labels are filled in otherwise)
/// * `userfile` - user labels
/// * `readers` - whether each block carries reader and rating lines
pub fn read_corpus(
    docfile: &str,
    vocabfile: Option<&str>,
    userfile: Option<&str>,
    readers: bool,
) -> anyhow::Result<Corpus> {
    let lines: Vec<String> = open_buf_reader(docfile)?
        .lines()
        .collect::<Result<_, _>>()?;

    let block = if readers { 4 } else { 2 };
    if lines.len() % block != 0 {
        return Err(CorpusError::Parse {
            line: lines.len(),
            what: "incomplete document block",
        }
        .into());
    }

    let mut corpus = Corpus::new();
    for (b, chunk) in lines.chunks(block).enumerate() {
        let line = b * block + 1;
        let mut doc = Document::new(
            parse_ids(&chunk[0], line, "term ids")?,
            parse_ids(&chunk[1], line + 1, "counts")?,
        );
        if readers {
            doc = doc.with_readers(
                parse_ids(&chunk[2], line + 2, "reader ids")?,
                parse_ids(&chunk[3], line + 3, "ratings")?,
            );
        }
        corpus.push_document(doc);
    }

    if let Some(file) = vocabfile {
        corpus = corpus.with_vocab(read_labels(file)?);
    }
    if let Some(file) = userfile {
        corpus = corpus.with_users(read_labels(file)?);
    }
    let corpus = corpus.with_numeric_labels();
    corpus.check()?;

    log::info!(
        "read {} documents, {} terms, {} users from {}",
        corpus.len(),
        corpus.vocab_size(),
        corpus.num_users(),
        docfile
    );
    Ok(corpus)
}

/// Write a corpus as a docfile
pub fn write_corpus(corpus: &Corpus, docfile: &str, readers: bool) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(docfile)?;
    for doc in corpus.iter() {
        writeln!(buf, "{}", join(doc.terms))?;
        writeln!(buf, "{}", join(doc.counts))?;
        if readers {
            writeln!(buf, "{}", join(doc.readers))?;
            writeln!(buf, "{}", join(doc.ratings))?;
        }
    }
    buf.flush()?;
    Ok(())
}

fn parse_ids(line: &str, line_no: usize, what: &'static str) -> Result<Vec<u32>, CorpusError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(vec![]);
    }
    line.split(',')
        .map(|x| {
            x.trim()
                .parse::<u32>()
                .map_err(|_| CorpusError::Parse { line: line_no, what })
        })
        .collect()
}

fn join(xx: &[u32]) -> String {
    xx.iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
