//! Binary encoding of everything sent between the parties.
//!
//! * Scalar: 8 bytes, host byte order.
//! * Vector: scalar length `n`, then `n` scalars.
//! * Matrix: scalar row count, scalar column count, then `rows * cols` scalars
//!   in row-major order. With zero rows or columns only the two headers are sent.
//!
//! No tags or sequence numbers are carried, the receiver has to know what comes next.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::bytes::{BufMut, BytesMut};

use crate::{
    algebra::{Matrix, Share, Vector},
    net::connection::ConnectionError,
};

/// Refuse lengths that would need more than this many elements.
const MAX_ELEMENTS: usize = 1 << 28;

/// A value with a fixed positional encoding.
pub trait Wire: Sized {
    fn encode(&self, buf: &mut BytesMut);

    fn decode<R: AsyncRead + Unpin + Send>(
        reader: &mut R,
    ) -> impl Future<Output = Result<Self, ConnectionError>> + Send;
}

impl Wire for Share {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.to_ne_bytes());
    }

    async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, ConnectionError> {
        let mut bytes = [0u8; 8];
        reader.read_exact(&mut bytes).await?;
        Ok(Share::from_ne_bytes(bytes))
    }
}

/// Read a scalar which must be a non-negative length.
pub(crate) async fn decode_len<R: AsyncRead + Unpin + Send>(
    reader: &mut R,
) -> Result<usize, ConnectionError> {
    let len = Share::decode(reader).await?;
    usize::try_from(len)
        .map_err(|_| ConnectionError::MalformedMessage(format!("negative length {len}")))
}

async fn decode_elements<R: AsyncRead + Unpin + Send>(
    reader: &mut R,
    n: usize,
) -> Result<Vec<Share>, ConnectionError> {
    if n > MAX_ELEMENTS {
        return Err(ConnectionError::MalformedMessage(format!(
            "{n} elements exceeds the limit of {MAX_ELEMENTS}"
        )));
    }
    let mut bytes = vec![0u8; n * 8];
    reader.read_exact(&mut bytes).await?;
    let elements = bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            Share::from_ne_bytes(word)
        })
        .collect();
    Ok(elements)
}

pub(crate) fn encode_len(len: usize, buf: &mut BytesMut) {
    (len as Share).encode(buf);
}

pub(crate) fn encode_elements(elements: &[Share], buf: &mut BytesMut) {
    buf.reserve(elements.len() * 8);
    for e in elements {
        e.encode(buf);
    }
}

/// Encode equally long rows as a matrix without collecting them first.
pub(crate) fn encode_rows<'a>(
    rows: impl ExactSizeIterator<Item = &'a [Share]> + Clone,
    buf: &mut BytesMut,
) {
    let n = rows.len();
    let cols = rows.clone().next().map_or(0, <[Share]>::len);
    encode_len(n, buf);
    encode_len(cols, buf);
    if n == 0 || cols == 0 {
        return;
    }
    for row in rows {
        debug_assert_eq!(row.len(), cols, "ragged rows on the wire");
        encode_elements(row, buf);
    }
}

impl Wire for Vector {
    fn encode(&self, buf: &mut BytesMut) {
        encode_len(self.len(), buf);
        encode_elements(self, buf);
    }

    async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, ConnectionError> {
        let n = decode_len(reader).await?;
        let elements = decode_elements(reader, n).await?;
        Ok(Vector::from_vec(elements))
    }
}

impl Wire for Matrix {
    fn encode(&self, buf: &mut BytesMut) {
        encode_len(self.rows(), buf);
        encode_len(self.cols(), buf);
        encode_elements(self.as_slice(), buf);
    }

    async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, ConnectionError> {
        let rows = decode_len(reader).await?;
        let cols = decode_len(reader).await?;
        if rows == 0 || cols == 0 {
            return Ok(Matrix::zeros(rows, cols));
        }
        let n = rows.checked_mul(cols).ok_or_else(|| {
            ConnectionError::MalformedMessage(format!("{rows}x{cols} matrix is too large"))
        })?;
        let elements = decode_elements(reader, n).await?;
        Matrix::new(rows, cols, elements)
            .map_err(|e| ConnectionError::MalformedMessage(e.to_string()))
    }
}

impl<A: Wire + Send, B: Wire + Send> Wire for (A, B) {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
        self.1.encode(buf);
    }

    async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, ConnectionError> {
        let a = A::decode(reader).await?;
        let b = B::decode(reader).await?;
        Ok((a, b))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bytes(words: &[Share]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    #[test]
    fn vector_layout() {
        let mut buf = BytesMut::new();
        Vector::from_array([5, -1]).encode(&mut buf);
        assert_eq!(&buf[..], &bytes(&[2, 5, -1])[..]);
    }

    #[test]
    fn matrix_layout() {
        let mut buf = BytesMut::new();
        let m = Matrix::from_rows(&[[1i64, 2, 3], [4, 5, 6]]).unwrap();
        m.encode(&mut buf);
        assert_eq!(&buf[..], &bytes(&[2, 3, 1, 2, 3, 4, 5, 6])[..]);
    }

    #[test]
    fn empty_matrix_is_headers_only() {
        let mut buf = BytesMut::new();
        Matrix::zeros(0, 0).encode(&mut buf);
        assert_eq!(&buf[..], &bytes(&[0, 0])[..]);

        let mut buf = BytesMut::new();
        Matrix::zeros(4, 0).encode(&mut buf);
        assert_eq!(&buf[..], &bytes(&[4, 0])[..]);
    }

    #[tokio::test]
    async fn decode_matrix() {
        let raw = bytes(&[2, 2, 1, 2, 3, 4, 9]);
        let mut reader = &raw[..];
        let m = Matrix::decode(&mut reader).await.unwrap();
        assert_eq!(m, Matrix::from_rows(&[[1i64, 2], [3, 4]]).unwrap());
        // the trailing scalar is left for the next read
        assert_eq!(Share::decode(&mut reader).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn decode_empty_matrix() {
        let raw = bytes(&[3, 0, 42]);
        let mut reader = &raw[..];
        let m = Matrix::decode(&mut reader).await.unwrap();
        assert_eq!(m.shape(), (3, 0));
        assert_eq!(Share::decode(&mut reader).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn negative_length() {
        let raw = bytes(&[-3]);
        let mut reader = &raw[..];
        let res = Vector::decode(&mut reader).await;
        assert!(matches!(res, Err(ConnectionError::MalformedMessage(_))));
    }

    #[tokio::test]
    async fn truncated() {
        let raw = bytes(&[4, 1, 2]);
        let mut reader = &raw[..];
        let res = Vector::decode(&mut reader).await;
        assert!(matches!(res, Err(ConnectionError::Closed)));
    }
}
