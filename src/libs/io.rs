use anyhow::Context;
use std::io::{BufRead, BufReader, BufWriter, Write};

fn is_gz(path: &std::path::Path) -> bool {
    path.extension() == Some(std::ffi::OsStr::new("gz"))
}

/// Opens `input` for buffered reading. `stdin` reads standard input and a
/// `.gz` suffix turns on transparent decompression.
///
/// ```
/// # fn main() -> anyhow::Result<()> {
/// use std::io::BufRead;
/// let reader = biomodal::reader("tests/fastq/pair_R1.fq")?;
/// let lines = reader.lines().collect::<Result<Vec<_>, _>>()?;
/// assert_eq!(lines.len() % 4, 0);
/// assert!(lines[0].starts_with('@'));
/// # Ok(())
/// # }
/// ```
pub fn reader(input: &str) -> anyhow::Result<Box<dyn BufRead + Send>> {
    let reader: Box<dyn BufRead + Send> = if input == "stdin" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let path = std::path::Path::new(input);
        let file = std::fs::File::open(path)
            .with_context(|| format!("could not open {}", path.display()))?;

        if is_gz(path) {
            Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        }
    };

    Ok(reader)
}

/// Opens `output` for buffered writing. `stdout` writes standard output and
/// a `.gz` suffix compresses the stream.
pub fn writer(output: &str) -> anyhow::Result<Box<dyn Write + Send>> {
    let writer: Box<dyn Write + Send> = if output == "stdout" {
        Box::new(BufWriter::new(std::io::stdout()))
    } else {
        let path = std::path::Path::new(output);
        let file = std::fs::File::create(path)
            .with_context(|| format!("could not create {}", path.display()))?;

        if is_gz(path) {
            Box::new(BufWriter::new(flate2::write::GzEncoder::new(
                file,
                flate2::Compression::default(),
            )))
        } else {
            Box::new(BufWriter::new(file))
        }
    };

    Ok(writer)
}

/// An output stream that reports errors from closing it.
///
/// Dropping a gzip encoder writes its trailer but discards any failure;
/// [`Output::finish`] writes it and returns the error instead.
pub enum Output {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<std::fs::File>),
    Gz(BufWriter<flate2::write::GzEncoder<std::fs::File>>),
}

/// Like [`writer`], for outputs that must be closed with [`Output::finish`].
pub fn output(output: &str) -> anyhow::Result<Output> {
    if output == "stdout" {
        return Ok(Output::Stdout(BufWriter::new(std::io::stdout())));
    }

    let path = std::path::Path::new(output);
    let file = std::fs::File::create(path)
        .with_context(|| format!("could not create {}", path.display()))?;
    if is_gz(path) {
        Ok(Output::Gz(BufWriter::new(flate2::write::GzEncoder::new(
            file,
            flate2::Compression::default(),
        ))))
    } else {
        Ok(Output::File(BufWriter::new(file)))
    }
}

impl Output {
    pub fn finish(self) -> anyhow::Result<()> {
        match self {
            Output::Stdout(mut w) => w.flush()?,
            Output::File(mut w) => w.flush()?,
            Output::Gz(w) => {
                let encoder = w.into_inner().map_err(|e| e.into_error())?;
                encoder.finish()?;
            }
        }
        Ok(())
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Output::Stdout(w) => w.write(buf),
            Output::File(w) => w.write(buf),
            Output::Gz(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Output::Stdout(w) => w.flush(),
            Output::File(w) => w.flush(),
            Output::Gz(w) => w.flush(),
        }
    }
}
