//! Helpers shared by the streaming repodata readers
//!
//! Repodata documents mix a default namespace with the `rpm:` prefix, so
//! every comparison is made on the local name.

use quick_xml::events::{BytesStart, BytesText};

use crate::Result;

/// Value of the attribute whose local name is `name`, if present.
pub(crate) fn attr(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        if attribute.key.local_name().as_ref() == name {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

pub(crate) fn text(t: &BytesText<'_>) -> Result<String> {
    Ok(t.unescape()?.into_owned())
}
