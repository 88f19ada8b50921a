//! Matrix Market export of the assembled system.

use std::io::{self, Write};

use crate::sim::heat_transfer::system::{CsrMatrix, LinearSystem};

/// Writes the reduced system matrix as `coordinate real symmetric`
/// (lower triangle, 1-based indices).
pub fn write_system<W: Write>(writer: &mut W, system: &LinearSystem) -> io::Result<()> {
    write_matrix(writer, &system.reduced)
}

pub fn write_matrix<W: Write>(writer: &mut W, matrix: &CsrMatrix) -> io::Result<()> {
    let lower: Vec<(usize, usize, f64)> = (0..matrix.n)
        .flat_map(|i| {
            matrix
                .row(i)
                .filter(move |(j, _)| *j <= i)
                .map(move |(j, v)| (i, j, v))
        })
        .collect();
    writeln!(writer, "%%MatrixMarket matrix coordinate real symmetric")?;
    writeln!(writer, "{} {} {}", matrix.n, matrix.n, lower.len())?;
    for (i, j, v) in lower {
        writeln!(writer, "{} {} {:e}", i + 1, j + 1, v)?;
    }
    Ok(())
}

/// Writes a vector as `array real general`.
pub fn write_vector<W: Write>(writer: &mut W, values: &[f64]) -> io::Result<()> {
    writeln!(writer, "%%MatrixMarket matrix array real general")?;
    writeln!(writer, "{} 1", values.len())?;
    for v in values {
        writeln!(writer, "{v:e}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_matrix_lower_triangle() {
        let m = CsrMatrix::from_rows(vec![
            vec![(0, 2.0), (1, -1.0)],
            vec![(0, -1.0), (1, 2.0)],
        ]);
        let mut out = Vec::new();
        write_matrix(&mut out, &m).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "%%MatrixMarket matrix coordinate real symmetric");
        assert_eq!(lines[1], "2 2 3");
        assert_eq!(&lines[2..], ["1 1 2e0", "2 1 -1e0", "2 2 2e0"]);
    }

    #[test]
    fn test_write_vector() {
        let mut out = Vec::new();
        write_vector(&mut out, &[1.5, -0.25]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "%%MatrixMarket matrix array real general\n2 1\n1.5e0\n-2.5e-1\n"
        );
    }
}
