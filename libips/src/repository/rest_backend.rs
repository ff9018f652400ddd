//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use super::{Repository, RepositoryConfig, RepositoryVersion, PublisherInfo, RepositoryInfo};

/// Repository implementation that uses a REST API
pub struct RestBackend {
    pub uri: String,
    pub config: RepositoryConfig,
    pub local_cache_path: Option<PathBuf>,
}

impl Repository for RestBackend {
    /// Create a new repository at the specified URI
    fn create<P: AsRef<Path>>(uri: P, version: RepositoryVersion) -> Result<Self> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to create the repository
        
        let uri_str = uri.as_ref().to_string_lossy().to_string();
        
        // Create the repository configuration
        let config = RepositoryConfig {
            version,
            ..Default::default()
        };
        
        // Create the repository structure
        let repo = RestBackend {
            uri: uri_str,
            config,
            local_cache_path: None,
        };
        
        // In a real implementation, we would make a REST API call to create the repository structure
        
        Ok(repo)
    }
    
    /// Open an existing repository
    fn open<P: AsRef<Path>>(uri: P) -> Result<Self> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to get the repository configuration
        
        let uri_str = uri.as_ref().to_string_lossy().to_string();
        
        // In a real implementation, we would fetch the repository configuration from the REST API
        // For now, we'll just create a default configuration
        let config = RepositoryConfig::default();
        
        Ok(RestBackend {
            uri: uri_str,
            config,
            local_cache_path: None,
        })
    }
    
    /// Save the repository configuration
    fn save_config(&self) -> Result<()> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to save the repository configuration
        
        // For now, just return Ok
        Ok(())
    }
    
    /// Add a publisher to the repository
    fn add_publisher(&mut self, publisher: &str) -> Result<()> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to add the publisher
        
        if !self.config.publishers.contains(&publisher.to_string()) {
            self.config.publishers.push(publisher.to_string());
            
            // In a real implementation, we would make a REST API call to create publisher-specific resources
            
            // Save the updated configuration
            self.save_config()?;
        }
        
        Ok(())
    }
    
    /// Remove a publisher from the repository
    fn remove_publisher(&mut self, publisher: &str, dry_run: bool) -> Result<()> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to remove the publisher
        
        if let Some(pos) = self.config.publishers.iter().position(|p| p == publisher) {
            if !dry_run {
                self.config.publishers.remove(pos);
                
                // In a real implementation, we would make a REST API call to remove publisher-specific resources
                
                // Save the updated configuration
                self.save_config()?;
            }
        }
        
        Ok(())
    }
    
    /// Get repository information
    fn get_info(&self) -> Result<RepositoryInfo> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to get repository information
        
        let mut publishers = Vec::new();
        
        for publisher_name in &self.config.publishers {
            // In a real implementation, we would get this information from the REST API
            let package_count = 0;
            let status = "online".to_string();
            let updated = "2025-07-21T18:46:00.000000Z".to_string();
            
            // Create a PublisherInfo struct and add it to the list
            publishers.push(PublisherInfo {
                name: publisher_name.clone(),
                package_count,
                status,
                updated,
            });
        }
        
        // Create and return a RepositoryInfo struct
        Ok(RepositoryInfo { publishers })
    }
    
    /// Set a repository property
    fn set_property(&mut self, property: &str, value: &str) -> Result<()> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to set the property
        
        self.config.properties.insert(property.to_string(), value.to_string());
        self.save_config()?;
        
        Ok(())
    }
    
    /// Set a publisher property
    fn set_publisher_property(&mut self, publisher: &str, property: &str, value: &str) -> Result<()> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to set the publisher property
        
        // Check if the publisher exists
        if !self.config.publishers.contains(&publisher.to_string()) {
            return Err(anyhow!("Publisher does not exist: {}", publisher));
        }
        
        // Create the property key in the format "publisher/property"
        let key = format!("{}/{}", publisher, property);
        
        // Set the property
        self.config.properties.insert(key, value.to_string());
        
        // Save the updated configuration
        self.save_config()?;
        
        Ok(())
    }
    
    /// List packages in the repository
    fn list_packages(&self, publisher: Option<&str>, pattern: Option<&str>) -> Result<Vec<(String, String, String)>> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to list packages
        
        let mut packages = Vec::new();
        
        // Filter publishers if specified
        let publishers = if let Some(pub_name) = publisher {
            if !self.config.publishers.contains(&pub_name.to_string()) {
                return Err(anyhow!("Publisher does not exist: {}", pub_name));
            }
            vec![pub_name.to_string()]
        } else {
            self.config.publishers.clone()
        };
        
        // For each publisher, list packages
        for pub_name in publishers {
            // In a real implementation, we would get this information from the REST API
            
            // Example package data (name, version, publisher)
            let example_packages = vec![
                ("example/package1".to_string(), "1.0.0".to_string(), pub_name.clone()),
                ("example/package2".to_string(), "2.0.0".to_string(), pub_name.clone()),
            ];
            
            // Filter by pattern if specified
            let filtered_packages = if let Some(pat) = pattern {
                example_packages.into_iter()
                    .filter(|(name, _, _)| name.contains(pat))
                    .collect()
            } else {
                example_packages
            };
            
            packages.extend(filtered_packages);
        }
        
        Ok(packages)
    }
    
    /// Show contents of packages
    fn show_contents(&self, publisher: Option<&str>, pattern: Option<&str>, action_types: Option<&[String]>) -> Result<Vec<(String, String, String)>> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to get package contents
        
        // Get the list of packages
        let packages = self.list_packages(publisher, pattern)?;
        
        // For each package, list contents
        let mut contents = Vec::new();
        
        for (pkg_name, pkg_version, _) in packages {
            // In a real implementation, we would get this information from the REST API
            
            // Example content data (package, path, type)
            let example_contents = vec![
                (format!("{}@{}", pkg_name, pkg_version), "/usr/bin/example".to_string(), "file".to_string()),
                (format!("{}@{}", pkg_name, pkg_version), "/usr/share/doc/example".to_string(), "dir".to_string()),
            ];
            
            // Filter by action type if specified
            let filtered_contents = if let Some(types) = action_types {
                example_contents.into_iter()
                    .filter(|(_, _, action_type)| types.contains(&action_type))
                    .collect::<Vec<_>>()
            } else {
                example_contents
            };
            
            contents.extend(filtered_contents);
        }
        
        Ok(contents)
    }
    
    /// Rebuild repository metadata
    fn rebuild(&self, publisher: Option<&str>, no_catalog: bool, no_index: bool) -> Result<()> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to rebuild metadata
        
        // Filter publishers if specified
        let publishers = if let Some(pub_name) = publisher {
            if !self.config.publishers.contains(&pub_name.to_string()) {
                return Err(anyhow!("Publisher does not exist: {}", pub_name));
            }
            vec![pub_name.to_string()]
        } else {
            self.config.publishers.clone()
        };
        
        // For each publisher, rebuild metadata
        for pub_name in publishers {
            println!("Rebuilding metadata for publisher: {}", pub_name);
            
            if !no_catalog {
                println!("Rebuilding catalog...");
                // In a real implementation, we would make a REST API call to rebuild the catalog
            }
            
            if !no_index {
                println!("Rebuilding search index...");
                // In a real implementation, we would make a REST API call to rebuild the search index
            }
        }
        
        Ok(())
    }
    
    /// Refresh repository metadata
    fn refresh(&self, publisher: Option<&str>, no_catalog: bool, no_index: bool) -> Result<()> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to refresh metadata
        
        // Filter publishers if specified
        let publishers = if let Some(pub_name) = publisher {
            if !self.config.publishers.contains(&pub_name.to_string()) {
                return Err(anyhow!("Publisher does not exist: {}", pub_name));
            }
            vec![pub_name.to_string()]
        } else {
            self.config.publishers.clone()
        };
        
        // For each publisher, refresh metadata
        for pub_name in publishers {
            println!("Refreshing metadata for publisher: {}", pub_name);
            
            if !no_catalog {
                println!("Refreshing catalog...");
                // In a real implementation, we would make a REST API call to refresh the catalog
            }
            
            if !no_index {
                println!("Refreshing search index...");
                // In a real implementation, we would make a REST API call to refresh the search index
            }
        }
        
        Ok(())
    }
    
    /// Set the default publisher for the repository
    fn set_default_publisher(&mut self, publisher: &str) -> Result<()> {
        // This is a stub implementation
        // In a real implementation, we would make a REST API call to set the default publisher
        
        // Check if the publisher exists
        if !self.config.publishers.contains(&publisher.to_string()) {
            return Err(anyhow!("Publisher does not exist: {}", publisher));
        }
        
        // Set the default publisher
        self.config.default_publisher = Some(publisher.to_string());
        
        // Save the updated configuration
        self.save_config()?;
        
        Ok(())
    }
}

impl RestBackend {
    /// Set the local cache path
    pub fn set_local_cache_path<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.local_cache_path = Some(path.as_ref().to_path_buf());
        Ok(())
    }
}