use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use flate2::read::ZlibDecoder;

use super::format::{
    global_heap_object, has_dense_links, parse_link, parse_object_header, parse_pipeline,
    parse_superblock, Attribute, Cursor, Dataspace, Datatype, Filter, Layout, Message, FILTER_DEFLATE,
    FILTER_FLETCHER32, FILTER_SHUFFLE, MSG_ATTRIBUTE, MSG_DATASPACE, MSG_DATATYPE, MSG_FILTER_PIPELINE,
    MSG_LAYOUT, MSG_LINK, MSG_LINK_INFO, MSG_SYMBOL_TABLE, UNDEFINED,
};
use super::value::decode_array;
use crate::data::NdArray;

/// An HDF5 file loaded into memory.
pub struct H5File {
    bytes: Vec<u8>,
    root: u64,
}

impl H5File {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_bytes(bytes).with_context(|| format!("{} is not a readable HDF5 file", path.display()))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let root = parse_superblock(&bytes)?;
        Ok(Self { bytes, root })
    }

    pub fn root(&self) -> Result<Object<'_>> {
        self.object(self.root)
    }

    pub fn object(&self, address: u64) -> Result<Object<'_>> {
        let messages = parse_object_header(&self.bytes, address)?;
        Ok(Object {
            file: self,
            address,
            messages,
        })
    }

    /// Follow a `/`-separated path from the root group.
    pub fn resolve(&self, path: &str) -> Result<Object<'_>> {
        let mut object = self.root()?;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let (_, address) = object
                .links()?
                .into_iter()
                .find(|(name, _)| name == part)
                .with_context(|| format!("no object named '{path}'"))?;
            object = self.object(address)?;
        }
        Ok(object)
    }

    /// Every dataset below the root as `(path, object)`, paths joined
    /// with `/` and listed in link order.
    pub fn datasets(&self) -> Result<Vec<(String, Object<'_>)>> {
        let mut out = Vec::new();
        self.walk(self.root()?, "", &mut out, 0)?;
        Ok(out)
    }

    fn walk<'f>(
        &'f self,
        group: Object<'f>,
        prefix: &str,
        out: &mut Vec<(String, Object<'f>)>,
        depth: usize,
    ) -> Result<()> {
        ensure!(depth < 64, "groups nested too deeply at '{prefix}'");
        for (name, address) in group.links()? {
            let path = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let child = self.object(address).with_context(|| format!("object '{path}'"))?;
            if child.is_group() {
                self.walk(child, &path, out, depth + 1)?;
            } else {
                out.push((path, child));
            }
        }
        Ok(())
    }

    /// Object addresses held by a variable-length reference attribute,
    /// one list per element.
    pub fn references(&self, attr: &Attribute) -> Result<Vec<Vec<u64>>> {
        ensure!(
            attr.datatype == Datatype::Sequence(Box::new(Datatype::Reference)),
            "attribute '{}' does not hold object references",
            attr.name
        );
        let mut cur = Cursor::new(&attr.raw);
        let mut lists = Vec::new();
        while cur.remaining() >= 16 {
            let count = cur.u32()? as usize;
            let collection = cur.u64()?;
            let index = cur.u32()?;
            if count == 0 {
                lists.push(Vec::new());
                continue;
            }
            let object = global_heap_object(&self.bytes, collection, index)?;
            let mut refs = Cursor::new(object);
            lists.push((0..count).map(|_| refs.u64()).collect::<Result<Vec<_>>>()?);
        }
        Ok(lists)
    }
}

/// A group or dataset: its object header messages.
pub struct Object<'f> {
    file: &'f H5File,
    pub address: u64,
    messages: Vec<Message>,
}

impl Object<'_> {
    fn message(&self, kind: u8) -> Option<&Message> {
        self.messages.iter().find(|m| m.kind == kind)
    }

    fn required(&self, kind: u8, what: &str) -> Result<&Message> {
        self.message(kind)
            .with_context(|| format!("object at {:#x} has no {what} message", self.address))
    }

    pub fn is_group(&self) -> bool {
        self.message(MSG_DATASPACE).is_none()
    }

    /// Hard links of a group, in the order they are stored.
    pub fn links(&self) -> Result<Vec<(String, u64)>> {
        if self.message(MSG_SYMBOL_TABLE).is_some() {
            bail!("groups written with the pre-1.8 symbol table layout are not supported");
        }
        if let Some(info) = self.message(MSG_LINK_INFO) {
            ensure!(
                !has_dense_links(&info.body)?,
                "groups with dense link storage are not supported"
            );
        }
        let mut links = Vec::new();
        for msg in self.messages.iter().filter(|m| m.kind == MSG_LINK) {
            if let Some(link) = parse_link(&msg.body)? {
                links.push(link);
            }
        }
        Ok(links)
    }

    pub fn attributes(&self) -> Result<Vec<Attribute>> {
        self.messages
            .iter()
            .filter(|m| m.kind == MSG_ATTRIBUTE)
            .map(|m| Attribute::parse(&m.body))
            .collect()
    }

    pub fn attribute(&self, name: &str) -> Result<Option<Attribute>> {
        Ok(self.attributes()?.into_iter().find(|a| a.name == name))
    }

    pub fn datatype(&self) -> Result<Datatype> {
        Datatype::parse(&self.required(MSG_DATATYPE, "datatype")?.body)
    }

    pub fn shape(&self) -> Result<Vec<usize>> {
        Dataspace::parse(&self.required(MSG_DATASPACE, "dataspace")?.body)?.shape()
    }

    fn filters(&self) -> Result<Vec<Filter>> {
        match self.message(MSG_FILTER_PIPELINE) {
            Some(msg) => parse_pipeline(&msg.body),
            None => Ok(Vec::new()),
        }
    }

    /// Compression level of the first deflate filter, if any.
    pub fn deflate_level(&self) -> Result<Option<u32>> {
        Ok(self
            .filters()?
            .into_iter()
            .find(|f| f.id == FILTER_DEFLATE)
            .map(|f| f.params.first().copied().unwrap_or(6)))
    }

    /// Load the dataset values.
    pub fn read(&self) -> Result<NdArray> {
        let datatype = self.datatype()?;
        let shape = self.shape()?;
        let needed = shape.iter().product::<usize>() * datatype.size();
        let layout = Layout::parse(&self.required(MSG_LAYOUT, "data layout")?.body)?;
        let bytes = &self.file.bytes;

        let raw = match layout {
            Layout::Compact(raw) => raw,
            Layout::Contiguous { address, .. } if address == UNDEFINED => vec![0; needed],
            Layout::Contiguous { address, .. } => slice(bytes, address, needed as u64)?.to_vec(),
            Layout::SingleChunk { address, .. } if address == UNDEFINED => vec![0; needed],
            Layout::SingleChunk { address, filtered_size } => {
                let stored = slice(bytes, address, filtered_size.unwrap_or(needed as u64))?;
                unfilter(stored, &self.filters()?, datatype.size())?
            }
        };
        decode_array(&datatype, &shape, &raw).with_context(|| format!("dataset at {:#x}", self.address))
    }
}

fn slice(bytes: &[u8], address: u64, len: u64) -> Result<&[u8]> {
    let start = usize::try_from(address)?;
    let end = start
        .checked_add(usize::try_from(len)?)
        .filter(|&end| end <= bytes.len())
        .with_context(|| format!("data at {address:#x} runs past the end of the file"))?;
    Ok(&bytes[start..end])
}

/// Undo a filter pipeline; filters are reversed last to first.
fn unfilter(stored: &[u8], filters: &[Filter], element: usize) -> Result<Vec<u8>> {
    let mut data = stored.to_vec();
    for filter in filters.iter().rev() {
        data = match filter.id {
            FILTER_DEFLATE => {
                let mut out = Vec::new();
                ZlibDecoder::new(data.as_slice())
                    .read_to_end(&mut out)
                    .context("inflating chunk")?;
                out
            }
            FILTER_SHUFFLE => unshuffle(&data, element),
            FILTER_FLETCHER32 => {
                ensure!(data.len() >= 4, "chunk too short for its fletcher32 checksum");
                data.truncate(data.len() - 4);
                data
            }
            id => bail!("filter {id} is not supported"),
        };
    }
    Ok(data)
}

fn unshuffle(data: &[u8], element: usize) -> Vec<u8> {
    if element <= 1 {
        return data.to_vec();
    }
    let count = data.len() / element;
    let mut out = data.to_vec();
    for (byte, plane) in data.chunks(count).take(element).enumerate() {
        for (i, &b) in plane.iter().enumerate() {
            out[i * element + byte] = b;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::format::SIGNATURE;
    use super::super::writer::{reference_list, H5Writer};
    use super::*;
    use ndarray::arr2;

    fn round_trip(writer: H5Writer, root: u64) -> H5File {
        H5File::from_bytes(writer.finish(root)).unwrap()
    }

    #[test]
    fn nested_groups_resolve_by_path() {
        let mut w = H5Writer::new();
        let flux = w.dataset(&NdArray::from(vec![1.0, 2.5, -3.0]), &[], 4).unwrap();
        let label = w.dataset(&NdArray::from("rp".to_string()), &[], 4).unwrap();
        let inner = w.group(&[("flux".into(), flux)], &[]).unwrap();
        let root = w.group(&[("sensor".into(), inner), ("label".into(), label)], &[]).unwrap();
        let file = round_trip(w, root);

        assert!(file.resolve("sensor").unwrap().is_group());
        let flux = file.resolve("/sensor/flux").unwrap();
        assert_eq!(flux.read().unwrap(), NdArray::from(vec![1.0, 2.5, -3.0]));
        assert_eq!(flux.deflate_level().unwrap(), Some(4));
        assert_eq!(file.resolve("label").unwrap().deflate_level().unwrap(), None);

        let paths: Vec<String> = file.datasets().unwrap().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, ["sensor/flux", "label"]);
        assert!(file.resolve("sensor/missing").is_err());
    }

    #[test]
    fn bytes_start_with_the_signature() {
        let mut w = H5Writer::new();
        let root = w.group(&[], &[]).unwrap();
        let bytes = w.finish(root);
        assert_eq!(&bytes[..8], &SIGNATURE);
        let file = H5File::from_bytes(bytes).unwrap();
        assert!(file.datasets().unwrap().is_empty());
    }

    #[test]
    fn compressed_chunks_are_smaller() {
        let values = NdArray::from(ndarray::Array1::<f64>::zeros(4096));
        let mut w = H5Writer::new();
        let zeros = w.dataset(&values, &[], 9).unwrap();
        let root = w.group(&[("zeros".into(), zeros)], &[]).unwrap();
        let bytes = w.finish(root);
        assert!(bytes.len() < 4096 * 8 / 4);
        let file = H5File::from_bytes(bytes).unwrap();
        assert_eq!(file.resolve("zeros").unwrap().read().unwrap(), values);
    }

    #[test]
    fn empty_and_placeholder_datasets_read_back() {
        let empty = NdArray::from(ndarray::Array2::<i32>::zeros((0, 3)));
        let mut w = H5Writer::new();
        let e = w.dataset(&empty, &[], 4).unwrap();
        let p = w.placeholder(Datatype::Float { size: 4 }, 5, &[]).unwrap();
        let root = w.group(&[("e".into(), e), ("p".into(), p)], &[]).unwrap();
        let file = round_trip(w, root);

        assert_eq!(file.resolve("e").unwrap().read().unwrap(), empty);
        let p = file.resolve("p").unwrap().read().unwrap();
        assert_eq!(p.shape(), &[5]);
    }

    #[test]
    fn reference_lists_point_back_at_objects() {
        let mut w = H5Writer::new();
        let x = w.dataset(&NdArray::from(vec![0i64, 1]), &[], 1).unwrap();
        let y = w.dataset(&NdArray::from(vec![10i64, 20, 30]), &[], 1).unwrap();
        let heap = w
            .global_heap(&[x.to_le_bytes().to_vec(), y.to_le_bytes().to_vec()])
            .unwrap();
        let attr = reference_list("DIMENSION_LIST", heap, &[(1, 1), (1, 2)]);
        let grid = w
            .dataset(&NdArray::from(arr2(&[[1u8, 2, 3], [4, 5, 6]])), &[attr], 1)
            .unwrap();
        let root = w.group(&[("grid".into(), grid)], &[]).unwrap();
        let file = round_trip(w, root);

        let grid = file.resolve("grid").unwrap();
        let attr = grid.attribute("DIMENSION_LIST").unwrap().unwrap();
        assert_eq!(file.references(&attr).unwrap(), vec![vec![x], vec![y]]);
    }

    #[test]
    fn shuffled_bytes_are_restored() {
        let shuffled = [1, 3, 2, 4];
        assert_eq!(unshuffle(&shuffled, 2), [1, 2, 3, 4]);
    }

    #[test]
    fn garbage_is_not_a_file() {
        assert!(H5File::from_bytes(b"PAR1 not hdf5 at all......".to_vec()).is_err());
    }
}
