//! Filename helpers.

use std::path::Path;

/// Slug used when a name has no usable characters.
pub const DEFAULT_SLUG: &str = "routine";

/// Voice reference formats the synthesis backend accepts.
pub const VOICE_EXTENSIONS: &[&str] = &["wav", "mp3", "ogg"];

/// Turn a free-form name into a filesystem-safe slug.
///
/// Latin letters with diacritics are folded to ASCII, every other non-ASCII
/// character is dropped, and each run of remaining non-alphanumerics becomes
/// a single `-`.
///
/// ```
/// use script_narrator::util::slugify;
///
/// assert_eq!(slugify("Héllö Wörld"), "hello-world");
/// assert_eq!(slugify("こんにちは世界"), "routine");
/// ```
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        let folded = if c.is_ascii() {
            Some(c)
        } else {
            fold_latin(c)
        };
        match folded {
            Some(c) if c.is_ascii_alphanumeric() => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c);
            }
            Some(_) => pending_dash = true,
            None => {}
        }
    }

    if slug.is_empty() {
        DEFAULT_SLUG.to_string()
    } else {
        slug
    }
}

/// ASCII base letter of a lowercase accented Latin letter.
fn fold_latin(c: char) -> Option<char> {
    let base = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'ď' | 'đ' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'ĥ' | 'ħ' => 'h',
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => 'i',
        'ĵ' => 'j',
        'ķ' => 'k',
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => 'l',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => 'o',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'ś' | 'ŝ' | 'ş' | 'š' | 'ß' => 's',
        'ţ' | 'ť' | 'ŧ' => 't',
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'ŵ' => 'w',
        'ý' | 'ÿ' | 'ŷ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        _ => return None,
    };
    Some(base)
}

/// `true` if `path` has one of [`VOICE_EXTENSIONS`], compared
/// case-insensitively.
pub fn allowed_voice_file(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VOICE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}
