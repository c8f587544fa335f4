use lentil::corpus_beans::io::open_buf_writer;
use lentil::{Ctpf, TrainSummary, VariationalModel};
use std::io::Write;

/// Write `{out}.topics.tsv.gz`, `{out}.doc_topics.tsv.gz` and
/// `{out}.top_terms.tsv`
pub fn write_topic_outputs<M: VariationalModel>(model: &M, out: &str, top_terms: usize) -> anyhow::Result<()> {
    let corpus = model.corpus();
    let vocab = corpus.vocab();
    let k = model.num_topics();

    // topic x term probabilities
    let beta = model.topic_term();
    let mut buf = open_buf_writer(&format!("{}.topics.tsv.gz", out))?;
    let header: Vec<&str> = vocab.iter().map(|x| x.as_ref()).collect();
    writeln!(buf, "topic\t{}", header.join("\t"))?;
    for (i, row) in beta.row_iter().enumerate() {
        writeln!(buf, "{}\t{}", i + 1, join_floats(row.iter()))?;
    }
    buf.flush()?;

    // document x topic proportions
    let mut buf = open_buf_writer(&format!("{}.doc_topics.tsv.gz", out))?;
    let header: Vec<String> = (1..=k).map(|i| i.to_string()).collect();
    writeln!(buf, "document\t{}", header.join("\t"))?;
    for (d, doc) in corpus.iter().enumerate() {
        let name = doc.title.map(str::to_string).unwrap_or_else(|| (d + 1).to_string());
        writeln!(buf, "{}\t{}", name, join_floats(model.topic_dist(d).iter()))?;
    }
    buf.flush()?;

    let mut buf = open_buf_writer(&format!("{}.top_terms.tsv", out))?;
    for i in 0..k {
        let terms: Vec<&str> = model
            .top_terms(i, top_terms)
            .into_iter()
            .map(|v| vocab[v].as_ref())
            .collect();
        writeln!(buf, "{}\t{}", i + 1, terms.join(","))?;
    }
    buf.flush()?;
    Ok(())
}

/// Write `{out}.doc_recommendations.tsv.gz` (users per document) and
/// `{out}.user_recommendations.tsv.gz` (documents per user), best first
pub fn write_recommendations(model: &Ctpf, out: &str) -> anyhow::Result<()> {
    let users = model.corpus().users();

    let mut buf = open_buf_writer(&format!("{}.doc_recommendations.tsv.gz", out))?;
    for (d, ranked) in model.document_recommendations().into_iter().enumerate() {
        let labels: Vec<&str> = ranked.into_iter().map(|u| users[u].as_ref()).collect();
        writeln!(buf, "{}\t{}", d + 1, labels.join(","))?;
    }
    buf.flush()?;

    let mut buf = open_buf_writer(&format!("{}.user_recommendations.tsv.gz", out))?;
    for (u, ranked) in model.user_recommendations().into_iter().enumerate() {
        let docs: Vec<String> = ranked.into_iter().map(|d| (d + 1).to_string()).collect();
        writeln!(buf, "{}\t{}", users[u], docs.join(","))?;
    }
    buf.flush()?;
    Ok(())
}

pub fn write_summary(summary: &TrainSummary, file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(file)?;
    serde_json::to_writer_pretty(&mut buf, summary)?;
    writeln!(buf)?;
    buf.flush()?;
    Ok(())
}

fn join_floats<'a, I: Iterator<Item = &'a f64>>(xx: I) -> String {
    xx.map(|x| format!("{:.6}", x)).collect::<Vec<_>>().join("\t")
}
