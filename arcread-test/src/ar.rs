//! GNU `ar` archives with a long name table.

const MAGIC: &[u8] = b"!<arch>\n";

fn member(out: &mut Vec<u8>, name: &str, body: &[u8]) {
    let header = format!(
        "{name:<16}{:<12}{:<6}{:<6}{:<8o}{:<10}`\n",
        1_700_000_000,
        0,
        0,
        0o100644,
        body.len(),
    );
    assert_eq!(header.len(), 60);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(b'\n');
    }
}

/// Build a GNU archive. Names longer than 15 bytes go to the `//` table.
pub fn gnu(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut table = Vec::new();
    let mut names = Vec::new();
    for (name, _) in members {
        if name.len() > 15 {
            names.push(format!("/{}", table.len()));
            table.extend_from_slice(name.as_bytes());
            table.extend_from_slice(b"/\n");
        } else {
            names.push(format!("{name}/"));
        }
    }

    let mut out = MAGIC.to_vec();
    if !table.is_empty() {
        member(&mut out, "//", &table);
    }
    for (name, (_, body)) in names.iter().zip(members) {
        member(&mut out, name, body);
    }
    out
}
