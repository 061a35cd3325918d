//! Storage Layer
//! =============
//!
//! A storage is a tree of groups whose leaves are typed collections. This
//! backend maps groups to directories, collections to bincode record
//! streams, and group properties to a JSON sidecar. The counting pipeline
//! writes under `dsk/`, the graph pipeline under `dbgh5/`.

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::CoreError;

/// Root handle, exclusive owner of the on-disk tree.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Create (or reuse) a storage rooted at `root`.
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| CoreError::io(format!("create storage {}", root.display()), e))?;
        Ok(Self { root })
    }

    /// Open an existing storage.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(anyhow!(CoreError::Format(format!(
                "no storage at {}",
                root.display()
            ))));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group(&self, name: &str) -> Result<Group> {
        Group::at(self.root.join(name))
    }

    /// Delete the whole tree.
    pub fn remove(self) -> Result<()> {
        std::fs::remove_dir_all(&self.root)
            .map_err(|e| CoreError::io(format!("remove storage {}", self.root.display()), e))?;
        Ok(())
    }
}

/// A node of the storage tree. Child groups nest arbitrarily.
#[derive(Debug, Clone)]
pub struct Group {
    dir: PathBuf,
}

impl Group {
    fn at(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| CoreError::io(format!("create group {}", dir.display()), e))?;
        Ok(Self { dir })
    }

    pub fn group(&self, name: &str) -> Result<Group> {
        Group::at(self.dir.join(name))
    }

    pub fn collection<T: Serialize + DeserializeOwned>(&self, name: &str) -> Collection<T> {
        Collection {
            path: self.dir.join(format!("{name}.dat")),
            _marker: std::marker::PhantomData,
        }
    }

    fn properties_path(&self) -> PathBuf {
        self.dir.join("properties.json")
    }

    fn load_properties(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let path = self.properties_path();
        if !path.exists() {
            return Ok(serde_json::Map::new());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| CoreError::io(format!("read {}", path.display()), e))?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow!(CoreError::Corruption(format!("properties {}: {e}", path.display()))))
    }

    pub fn add_property(&self, key: &str, value: &str) -> Result<()> {
        let mut props = self.load_properties()?;
        props.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        let path = self.properties_path();
        let text = serde_json::to_string_pretty(&props).expect("string map serializes");
        std::fs::write(&path, text)
            .map_err(|e| CoreError::io(format!("write {}", path.display()), e))?;
        Ok(())
    }

    pub fn property(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .load_properties()?
            .get(key)
            .and_then(|v| v.as_str().map(str::to_string)))
    }
}

/// Typed record collection backed by a bincode stream.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    path: PathBuf,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> Collection<T> {
    /// Truncating writer. Records become durable on `finish`.
    pub fn writer(&self) -> Result<CollectionWriter<T>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| CoreError::io(format!("create {}", self.path.display()), e))?;
        Ok(CollectionWriter {
            path: self.path.clone(),
            writer: BufWriter::with_capacity(1 << 20, file),
            nb_items: 0,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn write_all(&self, items: &[T]) -> Result<()> {
        let mut writer = self.writer()?;
        for item in items {
            writer.push(item)?;
        }
        writer.finish()?;
        Ok(())
    }

    /// Streaming iterator over stored records.
    pub fn iter(&self) -> Result<CollectionIter<T>> {
        let file = File::open(&self.path)
            .map_err(|e| CoreError::io(format!("open {}", self.path.display()), e))?;
        Ok(CollectionIter {
            path: self.path.clone(),
            reader: BufReader::with_capacity(1 << 20, file),
            done: false,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn read_all(&self) -> Result<Vec<T>> {
        self.iter()?.collect()
    }

    /// Exact stored record count.
    pub fn nb_items(&self) -> Result<u64> {
        let mut n = 0u64;
        for item in self.iter()? {
            item?;
            n += 1;
        }
        Ok(n)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

pub struct CollectionWriter<T> {
    path: PathBuf,
    writer: BufWriter<File>,
    nb_items: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Serialize> CollectionWriter<T> {
    pub fn push(&mut self, item: &T) -> Result<()> {
        bincode::serialize_into(&mut self.writer, item)
            .map_err(|e| anyhow!(CoreError::io(
                format!("append to {}", self.path.display()),
                std::io::Error::new(std::io::ErrorKind::Other, e),
            )))?;
        self.nb_items += 1;
        Ok(())
    }

    pub fn nb_items(&self) -> u64 {
        self.nb_items
    }

    pub fn finish(mut self) -> Result<u64> {
        self.writer
            .flush()
            .map_err(|e| CoreError::io(format!("flush {}", self.path.display()), e))?;
        Ok(self.nb_items)
    }
}

pub struct CollectionIter<T> {
    path: PathBuf,
    reader: BufReader<File>,
    done: bool,
    _marker: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned> Iterator for CollectionIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match bincode::deserialize_from(&mut self.reader) {
            Ok(item) => Some(Ok(item)),
            Err(err) => {
                self.done = true;
                if let bincode::ErrorKind::Io(io_err) = err.as_ref() {
                    if io_err.kind() == std::io::ErrorKind::UnexpectedEof {
                        return None;
                    }
                }
                Some(Err(anyhow!(CoreError::Corruption(format!(
                    "collection {}: {err}",
                    self.path.display()
                )))))
            }
        }
    }
}
