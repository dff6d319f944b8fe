use std::cmp::Ordering;

enum Chunk<'a> {
    Number(u64),
    Text(&'a str),
}

fn chunks(version: &str) -> impl Iterator<Item = Chunk<'_>> {
    let mut rest = version;
    std::iter::from_fn(move || {
        rest = rest.trim_start_matches(['.', '-', '_', '+', '~']);
        let first = rest.chars().next()?;
        let end = rest
            .find(|c: char| {
                c.is_ascii_digit() != first.is_ascii_digit() || matches!(c, '.' | '-' | '_' | '+' | '~')
            })
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some(match chunk.parse() {
            Ok(number) if first.is_ascii_digit() => Chunk::Number(number),
            _ => Chunk::Text(chunk),
        })
    })
}

/// Orders kernel release strings the way humans read them:
/// `6.1.0-18` sorts after `6.1.0-9`.
pub(crate) fn compare(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);
    loop {
        let ordering = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(Chunk::Number(x)), Some(Chunk::Number(y))) => x.cmp(&y),
            (Some(Chunk::Text(x)), Some(Chunk::Text(y))) => x.cmp(y),
            (Some(Chunk::Number(_)), Some(Chunk::Text(_))) => Ordering::Greater,
            (Some(Chunk::Text(_)), Some(Chunk::Number(_))) => Ordering::Less,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}
